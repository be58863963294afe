use crate::models::Job;

const HEADER: [&str; 7] = [
    "Job Title",
    "Company",
    "Location",
    "Salary",
    "Type",
    "Description",
    "Posted Date",
];

/// Renders the given jobs as CSV, one row per job, in list order.
pub fn jobs_to_csv(jobs: &[Job]) -> String {
    let mut out = String::new();
    push_row(&mut out, HEADER.iter().copied());
    for job in jobs {
        let posted = job.created_at.format("%Y-%m-%d").to_string();
        push_row(
            &mut out,
            [
                job.fields.title.as_str(),
                job.fields.company.as_str(),
                job.fields.location.as_str(),
                job.fields.salary.as_str(),
                job.fields.job_type.as_str(),
                job.fields.description.as_str(),
                posted.as_str(),
            ],
        );
    }
    out
}

fn push_row<'a>(out: &mut String, cells: impl IntoIterator<Item = &'a str>) {
    let row: Vec<String> = cells.into_iter().map(escape).collect();
    out.push_str(&row.join(","));
    out.push_str("\r\n");
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
