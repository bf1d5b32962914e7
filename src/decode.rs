use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::KiraError;
use crate::table::ProbeTable;

/// Turns a directory of idat files into a probe table keyed by sample accession.
pub trait IdatDecoder: Send + Sync {
    fn decode(&self, dir: &Path, array_type: &str) -> Result<ProbeTable, KiraError>;
}

const DECODED_FILE: &str = "decoded_beta_values.csv";

/// Runs an external decoder as `<program> <args...> <dir> <array_type> <out.csv>`.
#[derive(Debug, Clone)]
pub struct CommandIdatDecoder {
    program: Option<PathBuf>,
    name: String,
    args: Vec<String>,
}

impl CommandIdatDecoder {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        let candidate = Path::new(program);
        let resolved = if candidate.components().count() > 1 {
            candidate.exists().then(|| candidate.to_path_buf())
        } else {
            find_in_path(program)
        };
        Self {
            program: resolved,
            name: program.to_string(),
            args,
        }
    }

    pub fn is_available(&self) -> bool {
        self.program.is_some()
    }

    fn run_cmd(&self, program: &Path, args: &[String]) -> Result<(), KiraError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| KiraError::Decode(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", program.display())
        } else {
            stderr
        };
        Err(KiraError::Decode(message))
    }
}

impl IdatDecoder for CommandIdatDecoder {
    fn decode(&self, dir: &Path, array_type: &str) -> Result<ProbeTable, KiraError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| KiraError::MissingTool(self.name.clone()))?;
        let output = dir.join(DECODED_FILE);
        let mut args = self.args.clone();
        args.push(dir.to_string_lossy().to_string());
        args.push(array_type.to_string());
        args.push(output.to_string_lossy().to_string());
        debug!(program = %program.display(), array_type, "running idat decoder");
        self.run_cmd(program, &args)?;
        if !output.exists() {
            return Err(KiraError::Decode(format!(
                "{} did not produce {DECODED_FILE}",
                self.name
            )));
        }
        ProbeTable::from_path(&output)
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
