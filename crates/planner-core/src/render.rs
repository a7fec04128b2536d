use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{day_key, reference_timezone};
use crate::identity::Session;
use crate::task::Task;
use crate::urgency::{Band, classify, countdown};
use crate::views::WeekView;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            color: cfg.color()? && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn color(&self) -> bool {
        self.color
    }

    #[tracing::instrument(skip(self, tasks, now), fields(count = tasks.len()))]
    pub fn print_task_table(&self, tasks: &[&Task], now: DateTime<Utc>) -> anyhow::Result<()> {
        self.write_task_table(io::stdout().lock(), tasks, now)
    }

    pub fn write_task_table<W: Write>(
        &self,
        mut out: W,
        tasks: &[&Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = [
            "ID", "Urgency", "Due in", "Status", "Pri", "Done", "Project", "Scheduled", "Title",
        ]
        .map(ToString::to_string)
        .to_vec();

        let rows = tasks
            .iter()
            .map(|task| {
                let band = classify(task.due_at, now);
                vec![
                    self.paint(&task.short_id(), "33"),
                    self.paint_band(band),
                    countdown(task.due_at, now),
                    task.status.to_string(),
                    task.priority.label().to_string(),
                    format!("{}%", task.progress),
                    task.project.clone().unwrap_or_default(),
                    task.scheduled_date.map(day_key).unwrap_or_default(),
                    task.title.clone(),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, week, now))]
    pub fn print_week(&self, week: &WeekView<'_>, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.write_week(io::stdout().lock(), week, now)
    }

    pub fn write_week<W: Write>(
        &self,
        mut out: W,
        week: &WeekView<'_>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        for day in &week.days {
            let label = day.date.format("%a %Y-%m-%d").to_string();
            if day.is_today {
                writeln!(out, "{} (today)", self.paint(&label, "1"))?;
            } else {
                writeln!(out, "{label}")?;
            }
            self.write_task_table(&mut out, &day.tasks, now)?;
            writeln!(out)?;
        }

        writeln!(out, "Unscheduled")?;
        self.write_task_table(&mut out, &week.unscheduled, now)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task, now))]
    pub fn print_task_info(&self, task: &Task, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.write_task_info(io::stdout().lock(), task, now)
    }

    pub fn write_task_info<W: Write>(
        &self,
        mut out: W,
        task: &Task,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let tz = reference_timezone();
        let local = |at: DateTime<Utc>| at.with_timezone(tz).format("%Y-%m-%d %H:%M %Z").to_string();

        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "title     {}", task.title)?;
        writeln!(out, "type      {}", task.kind.as_str())?;
        writeln!(out, "status    {}", task.status)?;
        writeln!(out, "priority  {}", task.priority.label())?;
        writeln!(out, "estimate  {} blocks", task.estimate_blocks)?;
        writeln!(out, "progress  {}%", task.progress)?;
        if let Some(project) = &task.project {
            writeln!(out, "project   {project}")?;
        }
        if let Some(note) = &task.note {
            writeln!(out, "note      {note}")?;
        }
        if let Some(target) = task.target_date {
            writeln!(out, "target    {}", day_key(target))?;
        }
        match task.scheduled_date {
            Some(date) => writeln!(out, "scheduled {}", day_key(date))?,
            None => writeln!(out, "scheduled (unscheduled)")?,
        }
        if let Some(due) = task.due_at {
            writeln!(out, "due       {}", local(due))?;
        }
        writeln!(
            out,
            "urgency   {} ({})",
            self.paint_band(classify(task.due_at, now)),
            countdown(task.due_at, now)
        )?;
        writeln!(out, "created   {}", local(task.created_at))?;
        writeln!(out, "updated   {}", local(task.updated_at))?;
        Ok(())
    }

    pub fn print_projects(&self, projects: &[String]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if projects.is_empty() {
            writeln!(out, "No projects.")?;
        }
        for project in projects {
            writeln!(out, "{project}")?;
        }
        Ok(())
    }

    pub fn print_session(&self, session: Option<&Session>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        match session {
            Some(Session {
                user_id,
                email: Some(email),
            }) => writeln!(out, "{user_id} <{email}>")?,
            Some(session) => writeln!(out, "{}", session.user_id)?,
            None => writeln!(out, "Not signed in.")?,
        }
        Ok(())
    }

    fn paint_band(&self, band: Band) -> String {
        match band {
            Band::Red => self.paint(band.as_str(), "31"),
            Band::Amber => self.paint(band.as_str(), "33"),
            Band::Green => self.paint(band.as_str(), "32"),
            Band::None => "-".to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(header, width)| format!("{header:width$}"))
        .collect();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
            })
            .collect();
        writeln!(writer, "{}", cells.join(" ").trim_end())?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
