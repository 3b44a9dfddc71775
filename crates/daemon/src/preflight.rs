//! Startup check run on the worker pool: locate the bridge executable

use serde_json::json;
use std::path::PathBuf;

use watchkeeper_core::application::{TaskError, TaskResult, WorkerContext};

/// Build a task that resolves `program` (absolute/relative path, or a `PATH` lookup)
pub fn locate_bridge(program: String) -> impl FnOnce(&WorkerContext) -> TaskResult + Send + 'static {
    move |ctx| {
        let candidates: Vec<PathBuf> = if program.contains(std::path::MAIN_SEPARATOR) {
            vec![PathBuf::from(&program)]
        } else {
            std::env::var_os("PATH")
                .map(|paths| std::env::split_paths(&paths).map(|dir| dir.join(&program)).collect())
                .unwrap_or_default()
        };

        let total = candidates.len().max(1);
        for (checked, candidate) in candidates.iter().enumerate() {
            ctx.check_cancelled()?;
            if candidate.is_file() {
                return Ok(json!({ "program": candidate.display().to_string() }));
            }
            ctx.emit_progress(((checked + 1) * 100 / total) as u8);
        }

        Err(TaskError::failed(format!(
            "bridge executable not found: {}",
            program
        )))
    }
}
