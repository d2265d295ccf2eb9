//! Fallback rasterisation via an external renderer process.
//!
//! Wraps a `pdftoppm`-style tool behind the same contract as the primary
//! renderer: one page in, one `DynamicImage` out, page-local typed errors.
//! The tool is asked for the exact pixel dimensions the primary path would
//! have produced (`-scale-to-x`/`-scale-to-y`), so pages from either
//! renderer are interchangeable in the output document.
//!
//! Invocations are blocking subprocess calls with a bounded timeout: the
//! child is polled with `try_wait`, and on expiry it is killed and reaped —
//! a timed-out invocation is never left running. Output lands in a
//! [`tempfile::TempDir`] that cleans itself up on every exit path.

use crate::error::RenderError;
use image::DynamicImage;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Render one page with the external tool.
///
/// `page_index` is 0-based; the tool's own page numbering is 1-based.
pub fn render_page_with_tool(
    tool: &str,
    pdf_path: &Path,
    page_index: usize,
    px_w: u32,
    px_h: u32,
    grayscale: bool,
    password: Option<&str>,
    timeout: Duration,
) -> Result<DynamicImage, RenderError> {
    let page = page_index + 1;

    let temp_dir = TempDirGuard::new(page)?;
    let prefix = temp_dir.path().join("page");

    let args = tool_args(pdf_path, &prefix, page, px_w, px_h, grayscale, password);
    debug!("Invoking fallback tool: {} {:?}", tool, args);

    let mut child = Command::new(tool)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::ToolUnavailable {
                    tool: tool.to_string(),
                }
            } else {
                RenderError::ToolFailed {
                    page,
                    status: "failed to spawn".to_string(),
                    stderr: e.to_string(),
                }
            }
        })?;

    let status = wait_with_timeout(&mut child, page, timeout)?;

    let stderr = child
        .stderr
        .take()
        .map(|mut s| {
            let mut buf = String::new();
            s.read_to_string(&mut buf).ok();
            buf.trim().to_string()
        })
        .unwrap_or_default();

    if !status.success() {
        return Err(RenderError::ToolFailed {
            page,
            status: status.to_string(),
            stderr,
        });
    }
    if !stderr.is_empty() {
        warn!("Fallback tool stderr for page {}: {}", page, stderr);
    }

    let image_path = find_output_image(temp_dir.path(), page)?;
    image::open(&image_path).map_err(|e| RenderError::ToolFailed {
        page,
        status: "output unreadable".to_string(),
        stderr: format!("{}: {e}", image_path.display()),
    })
}

fn tool_args(
    pdf_path: &Path,
    prefix: &Path,
    page: usize,
    px_w: u32,
    px_h: u32,
    grayscale: bool,
    password: Option<&str>,
) -> Vec<String> {
    let mut args = vec!["-png".to_string()];
    if grayscale {
        args.push("-gray".to_string());
    }
    args.push("-f".to_string());
    args.push(page.to_string());
    args.push("-l".to_string());
    args.push(page.to_string());
    args.push("-scale-to-x".to_string());
    args.push(px_w.to_string());
    args.push("-scale-to-y".to_string());
    args.push(px_h.to_string());
    if let Some(pwd) = password {
        args.push("-upw".to_string());
        args.push(pwd.to_string());
    }
    args.push(pdf_path.to_string_lossy().into_owned());
    args.push(prefix.to_string_lossy().into_owned());
    args
}

/// Poll the child until it exits or the timeout elapses.
///
/// On timeout the child is killed and reaped before the error is returned.
fn wait_with_timeout(
    child: &mut std::process::Child,
    page: usize,
    timeout: Duration,
) -> Result<std::process::ExitStatus, RenderError> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start.elapsed() > timeout {
                    warn!("Fallback tool timed out on page {} — killing", page);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RenderError::Timeout {
                        page,
                        secs: timeout.as_secs(),
                    });
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return Err(RenderError::ToolFailed {
                    page,
                    status: "wait failed".to_string(),
                    stderr: e.to_string(),
                })
            }
        }
    }
}

/// Locate the single image the tool wrote.
///
/// The page-number suffix padding varies between tool versions
/// (`page-2.png` vs `page-02.png`), so scan the scratch directory instead
/// of guessing.
fn find_output_image(dir: &Path, page: usize) -> Result<std::path::PathBuf, RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| RenderError::ToolFailed {
        page,
        status: "output missing".to_string(),
        stderr: e.to_string(),
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "png") {
            return Ok(path);
        }
    }

    Err(RenderError::ToolFailed {
        page,
        status: "output missing".to_string(),
        stderr: format!("no PNG produced in {}", dir.display()),
    })
}

/// Thin wrapper so TempDir creation failures map to a page-local error.
struct TempDirGuard(tempfile::TempDir);

impl TempDirGuard {
    fn new(page: usize) -> Result<Self, RenderError> {
        tempfile::TempDir::new()
            .map(Self)
            .map_err(|e| RenderError::ToolFailed {
                page,
                status: "scratch dir".to_string(),
                stderr: e.to_string(),
            })
    }

    fn path(&self) -> &Path {
        self.0.path()
    }
}
