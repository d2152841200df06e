//! Build requests and the context they run in.
//!
//! [`execute`] is the single library entry point: the command line turns
//! its arguments into a [`BuildRequest`] and the configuration file into a
//! [`BuildContext`], then hands both over.

use crate::aim::{AimBuildSummary, build_signature};
use crate::error::{BuildError, Result};
use crate::index::build::{IndexBuildSummary, build_index};
use crate::spec::{
    AimOptions, AimSpec, BuildSpec, IndexOptions, IndexSpec, ModeOptions, Verbosity, parse_stored,
};
use crate::utils::{AppConfig, CaseMap, Collation};
use std::fs::OpenOptions;
use std::io::{IsTerminal, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub use crate::spec::header::IndexFormat;
use crate::spec::header::StoredHeader;

/// Settings shared by every build in one invocation.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Key ordering; None compares raw bytes.
    pub collation: Option<Collation>,
    /// Case fold applied to AIM n-grams unless `-D` is given.
    pub case_map: CaseMap,
    pub sort_memory_kb: usize,
    pub aim_memory_kb: usize,
    pub work_dir: Option<PathBuf>,
    pub verbosity: Verbosity,
    pub show_progress: bool,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::from_config(&AppConfig::default(), Verbosity::Quiet)
    }
}

impl BuildContext {
    pub fn from_config(config: &AppConfig, verbosity: Verbosity) -> Self {
        Self {
            collation: config.collation(),
            case_map: config.case_map(),
            sort_memory_kb: config.sort_memory_kb,
            aim_memory_kb: config.aim_memory_kb,
            work_dir: config.work_dir.clone(),
            verbosity,
            show_progress: verbosity >= Verbosity::Verbose && std::io::stderr().is_terminal(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMode {
    BuildIndex(IndexSpec),
    BuildSignature(AimSpec),
    /// Rebuild from the arguments stored in the existing output.
    Reindex(IndexFormat),
    /// Store the request's source path as the indexed file name.
    RenameSourceReference { format: IndexFormat, text_marker: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub mode: BuildMode,
    /// Indexed file. Reindex falls back to the stored name when absent.
    pub source: Option<PathBuf>,
    pub output: PathBuf,
}

impl BuildRequest {
    pub fn new(mode: BuildMode, source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            source: Some(source.into()),
            output: output.into(),
        }
    }

    fn require_source(&self) -> Result<&Path> {
        self.source
            .as_deref()
            .ok_or_else(|| BuildError::bad_argument("No input file named"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSummary {
    Index(IndexBuildSummary),
    Signature(AimBuildSummary),
    Renamed { format: IndexFormat, name: String },
}

/// Run one request to completion.
pub fn execute(request: &BuildRequest, ctx: &BuildContext) -> Result<BuildSummary> {
    match &request.mode {
        BuildMode::BuildIndex(spec) => {
            build_index(request.require_source()?, &request.output, spec, ctx)
                .map(BuildSummary::Index)
        }
        BuildMode::BuildSignature(spec) => {
            build_signature(request.require_source()?, &request.output, spec, ctx)
                .map(BuildSummary::Signature)
        }
        BuildMode::Reindex(format) => reindex(request, *format, ctx),
        BuildMode::RenameSourceReference { format, text_marker } => {
            rename(request, *format, *text_marker)
        }
    }
}

fn reindex(
    request: &BuildRequest,
    format: IndexFormat,
    ctx: &BuildContext,
) -> Result<BuildSummary> {
    let stored = StoredHeader::read(&request.output, format)?;
    stored.require_reindexable()?;
    let (name, arguments) = stored.stored_arguments()?;
    let source = request.source.clone().unwrap_or_else(|| PathBuf::from(&name));
    info!(
        "Reindexing {} from {} with {} stored argument(s)",
        request.output.display(),
        source.display(),
        arguments.len()
    );

    let name_len = source.to_string_lossy().len();
    match format {
        IndexFormat::Isi => {
            let spec = replay::<IndexOptions>(name_len, &arguments)?;
            build_index(&source, &request.output, &spec, ctx).map(BuildSummary::Index)
        }
        IndexFormat::Aim => {
            let spec = replay::<AimOptions>(name_len, &arguments)?;
            build_signature(&source, &request.output, &spec, ctx).map(BuildSummary::Signature)
        }
    }
}

fn replay<O: ModeOptions>(name_len: usize, arguments: &[String]) -> Result<BuildSpec<O>> {
    parse_stored::<O>(name_len, arguments).map_err(|e| {
        BuildError::BadHeader(format!("Invalid index: stored arguments rejected ({e})"))
    })
}

fn rename(request: &BuildRequest, format: IndexFormat, text_marker: bool) -> Result<BuildSummary> {
    let source = request.require_source()?;
    let name = source.to_string_lossy().into_owned();
    let mut stored = StoredHeader::read(&request.output, format)?;
    stored.rename(&name, text_marker)?;

    let mut file = OpenOptions::new()
        .write(true)
        .open(&request.output)
        .map_err(|e| BuildError::open(&request.output, e))?;
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.write_all(stored.as_bytes()))
        .map_err(BuildError::Write)?;
    file.sync_all().map_err(BuildError::Close)?;
    info!("Renamed source reference of {} to {name}", request.output.display());
    Ok(BuildSummary::Renamed { format, name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::spec::FieldSpec;

    fn sample(dir: &Path) -> PathBuf {
        let path = dir.join("people.txt");
        std::fs::write(&path, "SMITH   0001\nJONES   0002\nADAMS   0003\n").unwrap();
        path
    }

    fn index_spec() -> IndexSpec {
        IndexSpec {
            fields: vec![FieldSpec::new(0, 8)],
            options: IndexOptions { block_size: 512, ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn test_build_without_source_is_bad_argument() {
        let request = BuildRequest {
            mode: BuildMode::BuildIndex(index_spec()),
            source: None,
            output: PathBuf::from("unused.isi"),
        };
        let err = execute(&request, &BuildContext::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadArgument);
    }

    #[test]
    fn test_execute_index_build() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample(dir.path());
        let output = dir.path().join("people.isi");
        let request = BuildRequest::new(BuildMode::BuildIndex(index_spec()), &input, &output);
        let summary = execute(&request, &BuildContext::default()).unwrap();
        let BuildSummary::Index(summary) = summary else {
            panic!("expected an index summary");
        };
        assert_eq!(summary.keys, 3);
        assert_eq!(summary.duplicates, 0);
    }

    #[test]
    fn test_reindex_falls_back_to_stored_name() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample(dir.path());
        let output = dir.path().join("people.isi");
        execute(
            &BuildRequest::new(BuildMode::BuildIndex(index_spec()), &input, &output),
            &BuildContext::default(),
        )
        .unwrap();
        let first = std::fs::read(&output).unwrap();

        let request = BuildRequest {
            mode: BuildMode::Reindex(IndexFormat::Isi),
            source: None,
            output: output.clone(),
        };
        execute(&request, &BuildContext::default()).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), first);
    }

    #[test]
    fn test_rename_rewrites_only_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample(dir.path());
        let output = dir.path().join("people.isi");
        execute(
            &BuildRequest::new(BuildMode::BuildIndex(index_spec()), &input, &output),
            &BuildContext::default(),
        )
        .unwrap();
        let before = std::fs::read(&output).unwrap();

        let request = BuildRequest::new(
            BuildMode::RenameSourceReference { format: IndexFormat::Isi, text_marker: false },
            "moved.txt",
            &output,
        );
        let summary = execute(&request, &BuildContext::default()).unwrap();
        assert_eq!(
            summary,
            BuildSummary::Renamed { format: IndexFormat::Isi, name: "moved.txt".into() }
        );

        let after = std::fs::read(&output).unwrap();
        assert_eq!(after.len(), before.len());
        assert_eq!(after[512..], before[512..]);
        let stored = StoredHeader::read(&output, IndexFormat::Isi).unwrap();
        let (name, args) = stored.stored_arguments().unwrap();
        assert_eq!(name, "moved.txt");
        assert_eq!(args, vec!["1-8".to_string(), "-B=512".to_string()]);
    }

    #[test]
    fn test_reindex_of_missing_file_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = BuildRequest::new(
            BuildMode::Reindex(IndexFormat::Aim),
            "x.txt",
            dir.path().join("missing.aim"),
        );
        let err = execute(&request, &BuildContext::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Open);
    }
}
