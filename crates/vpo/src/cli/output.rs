//! Table output helpers for job listings.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, Table};
use vpo_db::{JobRecord, JobStatus, QueueStats};

pub fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Queued => Color::Yellow,
        JobStatus::Running => Color::Cyan,
        JobStatus::Completed => Color::Green,
        JobStatus::Failed => Color::Red,
        JobStatus::Cancelled => Color::DarkGrey,
    }
}

pub fn print_queue_stats(stats: &QueueStats) {
    println!(
        "queue: {} queued, {} running, {} completed, {} failed, {} cancelled",
        stats.queued, stats.running, stats.completed, stats.failed, stats.cancelled
    );
}

pub fn print_jobs_table(jobs: &[JobRecord]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        "id", "kind", "status", "pri", "progress", "source", "error",
    ]);
    for job in jobs {
        let short_id = job.id.to_string()[..8].to_string();
        table.add_row(vec![
            Cell::new(short_id),
            Cell::new(job.kind.as_str()),
            Cell::new(job.status.as_str()).fg(status_color(job.status)),
            Cell::new(job.priority),
            Cell::new(format!("{:.0}%", job.progress_percent)),
            Cell::new(&job.source_path),
            Cell::new(job.error_message.as_deref().unwrap_or("")),
        ]);
    }
    println!("{}", table);
}

pub fn print_job_detail(job: &JobRecord) {
    println!("id:        {}", job.id);
    println!("kind:      {}", job.kind);
    println!("status:    {}", job.status);
    println!("priority:  {}", job.priority);
    println!("progress:  {:.1}%", job.progress_percent);
    if let Some(detail) = &job.progress_detail {
        println!("detail:    {}", detail);
    }
    println!("source:    {}", job.source_path);
    if let Some(target) = &job.target_path {
        println!("target:    {}", target);
    }
    println!("policy:    {}", job.policy_ref);
    println!("created:   {}", job.created_at.to_rfc3339());
    if let Some(claimed) = job.claimed_at {
        println!("claimed:   {}", claimed.to_rfc3339());
    }
    if let Some(finished) = job.finished_at {
        println!("finished:  {}", finished.to_rfc3339());
    }
    println!("attempts:  {}", job.attempt_count);
    if let Some(error) = &job.error_message {
        println!("error:     {}", error);
    }
}
