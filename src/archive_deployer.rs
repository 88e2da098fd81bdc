//! Extracts a zip archive into a versioned workdir, locates its entrypoint
//! executable, and optionally launches it (C1).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SupervisorError;
use crate::service_info::DeployInfo;

/// Deployer-specific arguments recognized ahead of the remaining child
/// arguments, e.g. an explicit entrypoint override.
#[derive(Debug, Default, Clone)]
pub struct DeployerArgs {
    pub execute_file: Option<String>,
    pub archive_name: Option<String>,
    pub remaining: Vec<String>,
}

/// Extraction and entrypoint-resolution only — running the discovered
/// entrypoint and waiting out its early-exit window is `ServiceController`'s
/// job (`await_early_exit`), which is also what `Default`/`Multiple`-mode
/// non-zip launches go through; keeping one exit-code policy for "did Start
/// succeed" means this deployer has nothing to run things with.
pub struct ArchiveDeployer;

impl ArchiveDeployer {
    pub fn new() -> Self {
        ArchiveDeployer
    }

    /// Parses deployer-specific switches (`--execute-file=<name>`,
    /// `--archive-name=<name>`) out of `argv`; unrecognized leading `--`
    /// flags specific to the deployer are rejected, everything else is
    /// retained as child arguments.
    pub fn parse(argv: &[String]) -> Result<DeployerArgs, SupervisorError> {
        let mut args = DeployerArgs::default();
        for tok in argv {
            if let Some(value) = tok.strip_prefix("--execute-file=") {
                args.execute_file = Some(value.to_string());
            } else if let Some(value) = tok.strip_prefix("--archive-name=") {
                args.archive_name = Some(value.to_string());
            } else {
                args.remaining.push(tok.clone());
            }
        }
        Ok(args)
    }

    /// Unpacks `archive_path` into `work_dir/<versioned-subdir>`. Entries
    /// named in `deploy_info.overwrite` (by glob) always replace existing
    /// files; other entries are skipped if an existing file's mtime is
    /// newer than the archive's modification time for that entry.
    pub fn extract(
        &mut self,
        archive_path: &Path,
        work_dir: &Path,
        deploy_info: Option<&DeployInfo>,
        version_tag: &str,
    ) -> Result<PathBuf, SupervisorError> {
        // An empty version tag means "extract flat into work_dir itself" —
        // the convention used for hot-redeploy, where the FileWatcher keeps
        // watching the same directory across repeated extractions.
        let target_dir = if version_tag.is_empty() {
            work_dir.to_path_buf()
        } else {
            work_dir.join(version_tag)
        };
        fs::create_dir_all(&target_dir).map_err(|e| SupervisorError::Extraction {
            archive: archive_path.to_path_buf(),
            reason: format!("failed to create {}: {e}", target_dir.display()),
        })?;

        let file = fs::File::open(archive_path).map_err(|e| SupervisorError::Extraction {
            archive: archive_path.to_path_buf(),
            reason: format!("cannot open archive: {e}"),
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| SupervisorError::Extraction {
            archive: archive_path.to_path_buf(),
            reason: format!("corrupt zip: {e}"),
        })?;

        let overwrite_globs: &[String] = deploy_info
            .map(|d| d.overwrite.as_slice())
            .unwrap_or(&[]);

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| SupervisorError::Extraction {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to read entry {i}: {e}"),
                })?;

            // enclosed_name() rejects absolute paths and `..` components,
            // preventing zip-slip extraction outside target_dir.
            let Some(relative) = entry.enclosed_name() else {
                tracing::warn!(entry = entry.name(), "skipping unsafe zip entry path");
                continue;
            };
            let out_path = target_dir.join(&relative);

            if entry.is_dir() {
                fs::create_dir_all(&out_path).map_err(|e| SupervisorError::Extraction {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to create dir {}: {e}", out_path.display()),
                })?;
                continue;
            }

            let should_overwrite = out_path.exists()
                && !matches_any_glob(&relative.to_string_lossy(), overwrite_globs)
                && is_user_modified(&out_path, &entry);
            if should_overwrite {
                tracing::warn!(
                    path = %out_path.display(),
                    "preserving user-modified file outside overwrite set"
                );
                continue;
            }

            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|e| SupervisorError::Extraction {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to create dir {}: {e}", parent.display()),
                })?;
            }
            let mut out_file =
                fs::File::create(&out_path).map_err(|e| SupervisorError::Extraction {
                    archive: archive_path.to_path_buf(),
                    reason: format!("failed to create {}: {e}", out_path.display()),
                })?;
            std::io::copy(&mut entry, &mut out_file).map_err(|e| SupervisorError::Extraction {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to write {}: {e}", out_path.display()),
            })?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode));
            }
        }

        Ok(target_dir)
    }

    /// Locates the entrypoint inside `work_dir`. Policy, in order:
    /// an explicit `execute_file`, a single `*.dll`/`*.jar`/native binary
    /// matching `archive_name`, or the sole executable in the workdir root.
    pub fn find_exe_file(
        &self,
        work_dir: &Path,
        args: &DeployerArgs,
    ) -> Result<PathBuf, SupervisorError> {
        if let Some(explicit) = &args.execute_file {
            let candidate = work_dir.join(explicit);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        let entries = fs::read_dir(work_dir).map_err(|e| SupervisorError::Extraction {
            archive: work_dir.to_path_buf(),
            reason: format!("cannot read workdir: {e}"),
        })?;

        let mut candidates: Vec<PathBuf> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(archive_name) = &args.archive_name {
                let stem_matches = path
                    .file_stem()
                    .map(|s| s.to_string_lossy() == *archive_name)
                    .unwrap_or(false);
                let ext_matches = matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("dll") | Some("jar")
                ) || is_native_binary(&path);
                if stem_matches && ext_matches {
                    return Ok(path);
                }
            }
            if is_executable_candidate(&path) {
                candidates.push(path);
            }
        }

        match candidates.len() {
            1 => Ok(candidates.into_iter().next().unwrap()),
            0 => Err(SupervisorError::Extraction {
                archive: work_dir.to_path_buf(),
                reason: "no entrypoint found in extracted workdir".into(),
            }),
            _ => Err(SupervisorError::Extraction {
                archive: work_dir.to_path_buf(),
                reason: "multiple candidate entrypoints found; ambiguous".into(),
            }),
        }
    }
}

impl Default for ArchiveDeployer {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_any_glob(path: &str, globs: &[String]) -> bool {
    globs.iter().any(|g| glob_match(g, path))
}

/// Minimal `*`-only glob matcher, sufficient for the single-wildcard file
/// patterns this contract deals in (`*.dll`, `app.*`, etc.).
fn glob_match(pattern: &str, text: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == text,
        Some((prefix, suffix)) => {
            text.len() >= prefix.len() + suffix.len()
                && text.starts_with(prefix)
                && text.ends_with(suffix)
        }
    }
}

fn is_user_modified(out_path: &Path, entry: &zip::read::ZipFile<'_>) -> bool {
    let Ok(existing_mtime) = fs::metadata(out_path).and_then(|m| m.modified()) else {
        return false;
    };
    let existing_secs = existing_mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let dt = entry.last_modified();
    let archive_secs = civil_to_unix_secs(
        dt.year() as i64,
        dt.month() as u32,
        dt.day() as u32,
        dt.hour() as u32,
        dt.minute() as u32,
        dt.second() as u32,
    );
    existing_secs > archive_secs
}

/// Days-from-civil-date algorithm (Howard Hinnant), used instead of pulling
/// in the zip crate's optional `time` feature just to compare two
/// timestamps.
fn civil_to_unix_secs(year: i64, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;
    days * 86_400 + hour as i64 * 3_600 + minute as i64 * 60 + second as i64
}

fn is_native_binary(path: &Path) -> bool {
    path.extension().is_none() || path.extension().and_then(|e| e.to_str()) == Some("exe")
}

fn is_executable_candidate(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("dll") | Some("jar") | Some("exe")
    ) || is_native_binary(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn build_zip_with_entry(path: &Path, entry_name: &str, content: &[u8]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file(entry_name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn extract_unpacks_entries_into_versioned_subdir() {
        let src_dir = tempdir().unwrap();
        let work_dir = tempdir().unwrap();
        let archive_path = src_dir.path().join("app.zip");
        build_zip_with_entry(&archive_path, "app.dll", b"binary-content");

        let mut deployer = ArchiveDeployer::new();
        let out = deployer
            .extract(&archive_path, work_dir.path(), None, "v1")
            .unwrap();

        assert_eq!(out, work_dir.path().join("v1"));
        let extracted = fs::read(out.join("app.dll")).unwrap();
        assert_eq!(extracted, b"binary-content");
    }

    #[test]
    fn extract_rejects_zip_slip_paths() {
        let src_dir = tempdir().unwrap();
        let work_dir = tempdir().unwrap();
        let archive_path = src_dir.path().join("evil.zip");
        build_zip_with_entry(&archive_path, "../../etc/passwd", b"pwned");

        let mut deployer = ArchiveDeployer::new();
        let out = deployer
            .extract(&archive_path, work_dir.path(), None, "v1")
            .unwrap();
        assert!(!out.join("../../etc/passwd").exists());
        assert!(!work_dir
            .path()
            .parent()
            .unwrap()
            .parent()
            .unwrap()
            .join("etc/passwd")
            .exists());
    }

    #[test]
    fn find_exe_file_locates_sole_dll() {
        let work_dir = tempdir().unwrap();
        fs::write(work_dir.path().join("app.dll"), b"x").unwrap();
        let deployer = ArchiveDeployer::new();
        let args = DeployerArgs::default();
        let found = deployer.find_exe_file(work_dir.path(), &args).unwrap();
        assert_eq!(found, work_dir.path().join("app.dll"));
    }

    #[test]
    fn find_exe_file_errors_when_no_candidate() {
        let work_dir = tempdir().unwrap();
        fs::write(work_dir.path().join("readme.txt"), b"x").unwrap();
        let deployer = ArchiveDeployer::new();
        let args = DeployerArgs::default();
        assert!(deployer.find_exe_file(work_dir.path(), &args).is_err());
    }

    #[test]
    fn parse_extracts_deployer_switches() {
        let argv = vec![
            "--execute-file=app.dll".to_string(),
            "--port=80".to_string(),
        ];
        let parsed = ArchiveDeployer::parse(&argv).unwrap();
        assert_eq!(parsed.execute_file.as_deref(), Some("app.dll"));
        assert_eq!(parsed.remaining, vec!["--port=80".to_string()]);
    }
}
