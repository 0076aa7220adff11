//! CLI output: error mapping from pipeline errors to the stable CLI surface.

use crate::error::PipelineError;

/// `error[<module>/<code>]: <message>`
pub fn map_error(e: &PipelineError) -> String {
    format!("error[{}/{}]: {}", e.module(), e.code(), e)
}
