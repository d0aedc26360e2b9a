//! Tiny helper staged into warming pods.
//!
//! The init container runs it with `--mode copy` to drop a copy of itself
//! into a shared volume; the warmed image's container then execs that copy
//! with `--mode sleep` so the pod stays up without depending on anything
//! inside the image.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SLEEP_FOR: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Block (practically) forever.
    Sleep,
    /// Copy this executable to `--to`.
    Copy,
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[arg(long, value_enum)]
    mode: Mode,

    /// Destination of the copy.
    #[arg(long, required_if_eq("mode", "copy"))]
    to: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_log();
    let args = Args::parse();
    match args.mode {
        Mode::Sleep => {
            info!(?SLEEP_FOR, "sleeping");
            std::thread::sleep(SLEEP_FOR);
            anyhow::bail!("woke up after {:?}", SLEEP_FOR)
        }
        Mode::Copy => {
            let to = args.to.context("--to is required with --mode copy")?;
            copy_self(&to)
        }
    }
}

fn copy_self(to: &Path) -> anyhow::Result<()> {
    let me = std::env::current_exe().context("locating own executable")?;
    std::fs::copy(&me, to)
        .with_context(|| format!("copying {} to {}", me.display(), to.display()))?;
    make_executable(to)?;
    info!(from = %me.display(), to = %to.display(), "copied sleeper");
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
        .with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

fn init_log() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sleep() {
        let args = Args::try_parse_from(["sleeper", "--mode", "sleep"]).unwrap();
        assert_eq!(args.mode, Mode::Sleep);
        assert!(args.to.is_none());
    }

    #[test]
    fn copy_requires_destination() {
        assert!(Args::try_parse_from(["sleeper", "--mode", "copy"]).is_err());
        let args = Args::try_parse_from(["sleeper", "--mode", "copy", "--to", "/drop/sleeper"]).unwrap();
        assert_eq!(args.to.as_deref(), Some(Path::new("/drop/sleeper")));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Args::try_parse_from(["sleeper", "--mode", "dance"]).is_err());
    }

    #[test]
    fn copies_itself_executable() {
        let dir = std::env::temp_dir().join(format!("sleeper-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let to = dir.join("sleeper");
        copy_self(&to).unwrap();
        let meta = std::fs::metadata(&to).unwrap();
        assert!(meta.len() > 0);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(meta.permissions().mode() & 0o777, 0o777);
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
