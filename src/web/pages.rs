//! HTML pages
//!
//! Plain strings; every value that came from a student or a subprocess goes
//! through `escape`.

use crate::trial::{ShutdownReport, TrialReport};

const HEAD: &str = "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Auto-Checker</title></head>\n<body>\n";
const FOOT: &str = "</body>\n</html>\n";

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(body: &str) -> String {
    format!("{}{}{}", HEAD, body, FOOT)
}

/// Upload form
pub fn index() -> String {
    page(
        "<h1>Auto-Checker</h1>\n\
         <form action=\"/_upload\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <p><label>Credentials file (.ini) <input type=\"file\" name=\"cfgfile\"></label></p>\n\
         <p><label>Project <input type=\"text\" name=\"project\" placeholder=\"proj0:hello\"></label></p>\n\
         <p><input type=\"submit\" value=\"Check\"></p>\n\
         </form>\n",
    )
}

pub fn trial_results(report: &TrialReport) -> String {
    let ctx = &report.context;
    let port = ctx.port.as_deref().unwrap_or("(none)");
    page(&format!(
        "<h1>Results: {status}</h1>\n\
         <p>Project {project}, application {app}</p>\n\
         <p>Repository {repo}</p>\n\
         <p>Test server port {port}</p>\n\
         <pre>{log}</pre>\n\
         <p><a href=\"/_kill\">Shut down test server</a> | <a href=\"/index\">Check another</a></p>\n",
        status = report.status_label(),
        project = escape(&ctx.project),
        app = escape(&ctx.app),
        repo = escape(&ctx.repo_remote),
        port = escape(port),
        log = escape(&report.log().render()),
    ))
}

pub fn shutdown_results(report: &ShutdownReport) -> String {
    let status = if report.success { "OK" } else { "Errors" };
    page(&format!(
        "<h1>Shutdown: {}</h1>\n<pre>{}</pre>\n<p><a href=\"/index\">Check another</a></p>\n",
        status,
        escape(&report.log.render()),
    ))
}

/// Shown for a rejected request
pub fn error(message: &str) -> String {
    page(&format!(
        "<h1>Request rejected</h1>\n<p>{}</p>\n<p><a href=\"/index\">Back</a></p>\n",
        escape(message)
    ))
}
