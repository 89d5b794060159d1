//! Renderer backed by an external command.
//!
//! For every tile the command is started once and talks to the job over its
//! pipes. Requests go to stdin, replies come back on stdout, and stderr is
//! collected for error reports.
//!
//! 1. The job writes the render request as one line of JSON.
//! 2. The command may ask for resources with `RESOURCE <kind> <path>`, where
//!    `kind` is a MapLibre resource kind code. Each request is answered with
//!    `OK <len>` followed by `len` bytes, `NOT_FOUND` or `ERROR <message>`.
//! 3. The command finishes with `IMAGE <len>` followed by the premultiplied
//!    RGBA buffer.

use super::{BoxFuture, RawImage, RenderError, RenderRequest, Renderer, ResourceSource};
use crate::cache::ResourceType;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::process::Command;
use tracing::{trace, warn};

/// Runs an external renderer per tile.
#[derive(Debug, Clone)]
pub struct ProcessRenderer {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessRenderer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments passed before the request is written.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Parse a command line such as `"render-tile --gl egl"`.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts.map(String::from).collect()))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    async fn run(
        &self,
        request: RenderRequest<'_>,
        resources: &dyn ResourceSource,
    ) -> Result<RawImage, RenderError> {
        let mut payload = serde_json::to_vec(&request)?;
        payload.push(b'\n');

        trace!(
            program = %self.program.display(),
            zoom = request.zoom,
            width = request.width,
            height = request.height,
            "Starting renderer"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RenderError::Spawn)?;

        let (Some(mut stdin), Some(stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(RenderError::Protocol("renderer pipes unavailable".into()));
        };

        // Drained while the exchange runs so a chatty renderer never blocks.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let mut stdout = BufReader::new(stdout);
        let result = exchange(
            &mut stdin,
            &mut stdout,
            &payload,
            resources,
            request.expected_len(),
        )
        .await;
        drop(stdin);

        if result.is_err() {
            let _ = child.start_kill();
        }
        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        match result? {
            Some(data) if status.success() => Ok(RawImage {
                width: request.width * request.ratio,
                height: request.height * request.ratio,
                data,
            }),
            _ if !status.success() => Err(RenderError::Failed {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            }),
            _ => Err(RenderError::Protocol("renderer exited without an image".into())),
        }
    }
}

impl Renderer for ProcessRenderer {
    fn render<'a>(
        &'a self,
        request: RenderRequest<'a>,
        resources: &'a dyn ResourceSource,
    ) -> BoxFuture<'a, Result<RawImage, RenderError>> {
        Box::pin(self.run(request, resources))
    }
}

/// Send the request, answer resource requests and read the image.
///
/// Returns `Ok(None)` when the renderer goes away before sending an image;
/// its exit status then tells what happened.
async fn exchange<W, R>(
    input: &mut W,
    output: &mut R,
    payload: &[u8],
    resources: &dyn ResourceSource,
    expected: usize,
) -> Result<Option<Vec<u8>>, RenderError>
where
    W: AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
{
    if let Err(e) = send(input, payload).await {
        return match e.kind() {
            ErrorKind::BrokenPipe => Ok(None),
            _ => Err(e.into()),
        };
    }

    let mut line = String::new();
    loop {
        line.clear();
        if output.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let message = line.trim_end();
        match message.split_once(' ') {
            Some(("IMAGE", len)) => {
                let len: usize = len
                    .parse()
                    .map_err(|_| RenderError::Protocol(format!("invalid image length '{}'", len)))?;
                if len != expected {
                    return Err(RenderError::UnexpectedSize {
                        expected,
                        actual: len,
                    });
                }
                let mut data = vec![0; len];
                output.read_exact(&mut data).await?;
                return Ok(Some(data));
            }
            Some(("RESOURCE", target)) => {
                let reply = resolve(resources, target).await;
                send(input, &reply).await?;
            }
            _ => {
                return Err(RenderError::Protocol(format!(
                    "unexpected message '{}'",
                    message
                )))
            }
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(input: &mut W, data: &[u8]) -> std::io::Result<()> {
    input.write_all(data).await?;
    input.flush().await
}

/// Answer one `RESOURCE <kind> <path>` request.
async fn resolve(resources: &dyn ResourceSource, target: &str) -> Vec<u8> {
    let parsed = target
        .split_once(' ')
        .and_then(|(kind, path)| {
            let resource = ResourceType::from_kind(kind.parse().ok()?)?;
            Some((resource, path))
        })
        .ok_or_else(|| format!("invalid resource request '{}'", target));

    let result = match parsed {
        Ok((resource, path)) => {
            trace!(resource = ?resource, path, "Renderer requested resource");
            resources.read(resource, path).await.map_err(|e| e.to_string())
        }
        Err(message) => Err(message),
    };

    match result {
        Ok(Some(data)) => {
            let mut reply = format!("OK {}\n", data.len()).into_bytes();
            reply.extend_from_slice(&data);
            reply
        }
        Ok(None) => b"NOT_FOUND\n".to_vec(),
        Err(message) => {
            warn!(request = target, error = %message, "Resource request failed");
            format!("ERROR {}\n", message.replace('\n', " ")).into_bytes()
        }
    }
}
