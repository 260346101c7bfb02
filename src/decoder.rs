//! Hand-off of compressed or encrypted members to an external decoder.
//!
//! The crate never decompresses or decrypts. For members it cannot copy
//! verbatim it builds a [`DecodeRequest`] and passes it to an
//! [`ExternalDecoder`]. [`UnrarCommand`] is the bundled implementation,
//! running `unrar p` and streaming its stdout into the sink.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::byte_source::ByteSource;
use crate::error::{RarError, Result};
use crate::formats::CompressionMethod;
use crate::locator::Locator;

/// Boxed future returned by [`ExternalDecoder::decode`], resolving to the
/// number of bytes written to the sink.
pub type DecodeFuture<'a> = Pin<Box<dyn Future<Output = Result<u64>> + Send + 'a>>;

/// Output sink for decoded bytes.
pub type DecodeSink<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

/// One volume of the archive as seen by a decoder.
#[derive(Debug, Clone)]
pub struct VolumeHandle {
    pub index: usize,
    pub locator: Locator,
    pub source: Arc<dyn ByteSource>,
}

/// Everything a decoder needs to produce one member.
#[derive(Clone)]
pub struct DecodeRequest {
    /// Volumes from the first up to the last one holding the member.
    pub volumes: Vec<VolumeHandle>,
    pub entry_name: String,
    pub position: usize,
    pub method: CompressionMethod,
    pub encrypted: bool,
    pub password: Option<String>,
    /// Expected unpacked size.
    pub size: u64,
    pub crc: Option<u32>,
}

impl fmt::Debug for DecodeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeRequest")
            .field("volumes", &self.volumes.len())
            .field("entry_name", &self.entry_name)
            .field("position", &self.position)
            .field("method", &self.method)
            .field("encrypted", &self.encrypted)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("size", &self.size)
            .field("crc", &self.crc)
            .finish()
    }
}

/// A decoder for members the crate cannot copy verbatim.
///
/// Implementations write the unpacked member to `sink` and return the number
/// of bytes written. They should stop promptly once `cancel` fires and
/// return [`RarError::Cancelled`].
pub trait ExternalDecoder: Send + Sync + fmt::Debug {
    fn decode<'a>(
        &'a self,
        request: &'a DecodeRequest,
        sink: DecodeSink<'a>,
        cancel: &'a CancellationToken,
    ) -> DecodeFuture<'a>;
}

/// `unrar` exit code for a wrong or missing password.
const UNRAR_BAD_PASSWORD: i32 = 11;

const MATERIALIZE_CHUNK: u64 = 1024 * 1024;

/// Volumes copied to local disk for the command line tool.
#[derive(Debug)]
struct Materialized {
    dir: TempDir,
    archive: PathBuf,
    written: HashSet<usize>,
}

/// Runs `unrar p -inul -y -p<password> <archive> <member>`.
///
/// Volumes that are not local files are copied into a temporary directory
/// the first time a member of that archive is decoded and reused afterwards.
/// The directory is removed when the decoder is dropped.
#[derive(Debug)]
pub struct UnrarCommand {
    program: PathBuf,
    materialized: Mutex<HashMap<String, Materialized>>,
}

impl Default for UnrarCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl UnrarCommand {
    /// Use `unrar` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("unrar")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            materialized: Mutex::new(HashMap::new()),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments after the program name.
    pub fn build_args(archive: &Path, member: &str, password: Option<&str>) -> Vec<String> {
        let password = match password {
            Some(password) => format!("-p{}", password),
            None => "-p-".to_string(),
        };
        vec![
            "p".to_string(),
            "-inul".to_string(),
            "-y".to_string(),
            password,
            archive.display().to_string(),
            member.to_string(),
        ]
    }

    /// Local path of the first volume, copying volumes to disk as needed.
    async fn local_archive(&self, request: &DecodeRequest) -> Result<PathBuf> {
        let first = request
            .volumes
            .first()
            .ok_or_else(|| RarError::DecodeFailed {
                name: request.entry_name.clone(),
                reason: "no volumes in request".to_string(),
            })?;
        if let Locator::Path(path) = &first.locator {
            return Ok(path.clone());
        }

        let key = first.locator.to_string();
        let mut cache = self.materialized.lock().await;
        if !cache.contains_key(&key) {
            let dir = tempfile::Builder::new().prefix("rar-seek-").tempdir()?;
            let archive = dir.path().join(volume_file_name(first));
            cache.insert(
                key.clone(),
                Materialized {
                    dir,
                    archive,
                    written: HashSet::new(),
                },
            );
        }
        let Some(entry) = cache.get_mut(&key) else {
            return Err(RarError::DecodeFailed {
                name: request.entry_name.clone(),
                reason: "materialized volumes missing from cache".to_string(),
            });
        };

        for handle in &request.volumes {
            if entry.written.contains(&handle.index) {
                continue;
            }
            let target = entry.dir.path().join(volume_file_name(handle));
            write_volume(handle.source.as_ref(), &target).await?;
            debug!(volume = handle.index, path = %target.display(), "materialized volume");
            entry.written.insert(handle.index);
        }
        Ok(entry.archive.clone())
    }

    async fn run(
        &self,
        request: &DecodeRequest,
        sink: DecodeSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let archive = self.local_archive(request).await?;
        let args = Self::build_args(&archive, &request.entry_name, request.password.as_deref());
        debug!(program = %self.program.display(), entry = %request.entry_name, "running decoder");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RarError::DecoderUnavailable(format!("{}: {}", self.program.display(), e))
            })?;

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            return Err(RarError::DecoderUnavailable(
                "decoder pipes unavailable".to_string(),
            ));
        };

        let streams = async {
            tokio::try_join!(copy_to_sink(&mut stdout, sink), read_all(&mut stderr))
        };
        let (written, stderr) = tokio::select! {
            result = streams => result?,
            () = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill decoder");
                }
                return Err(RarError::Cancelled);
            }
        };

        let status = child.wait().await?;
        match status.code() {
            Some(0) => Ok(written),
            Some(UNRAR_BAD_PASSWORD) => Err(RarError::PasswordRequired {
                name: request.entry_name.clone(),
            }),
            code => {
                let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
                let reason = match code {
                    Some(code) if stderr.is_empty() => format!("exit code {}", code),
                    Some(code) => format!("exit code {}: {}", code, stderr),
                    None => "terminated by signal".to_string(),
                };
                Err(RarError::DecodeFailed {
                    name: request.entry_name.clone(),
                    reason,
                })
            }
        }
    }
}

impl ExternalDecoder for UnrarCommand {
    fn decode<'a>(
        &'a self,
        request: &'a DecodeRequest,
        sink: DecodeSink<'a>,
        cancel: &'a CancellationToken,
    ) -> DecodeFuture<'a> {
        Box::pin(self.run(request, sink, cancel))
    }
}

fn volume_file_name(handle: &VolumeHandle) -> String {
    handle
        .locator
        .file_name()
        .unwrap_or_else(|| handle.source.name())
        .to_string()
}

async fn copy_to_sink<R>(reader: &mut R, sink: DecodeSink<'_>) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let written = tokio::io::copy(reader, &mut *sink).await?;
    sink.flush().await?;
    Ok(written)
}

async fn read_all<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Copy a whole source to `target`, one chunk at a time.
async fn write_volume(source: &dyn ByteSource, target: &Path) -> Result<()> {
    let Some(length) = source.length() else {
        return Err(RarError::DecodeFailed {
            name: source.name().to_string(),
            reason: "cannot materialize a volume of unknown length".to_string(),
        });
    };
    let mut file = tokio::fs::File::create(target).await?;
    let mut offset = 0;
    while offset < length {
        let chunk = MATERIALIZE_CHUNK.min(length - offset);
        let bytes = source.read(offset, chunk).await?;
        file.write_all(&bytes).await?;
        offset += chunk;
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_source::MemorySource;

    fn request(volumes: Vec<VolumeHandle>, password: Option<&str>) -> DecodeRequest {
        DecodeRequest {
            volumes,
            entry_name: "nested/test.bin".to_string(),
            position: 0,
            method: CompressionMethod::Best,
            encrypted: password.is_some(),
            password: password.map(str::to_string),
            size: 3,
            crc: None,
        }
    }

    fn memory_volume(index: usize, name: &str, data: &[u8]) -> VolumeHandle {
        VolumeHandle {
            index,
            locator: Locator::memory(name, data.to_vec()),
            source: Arc::new(MemorySource::new(name, data.to_vec())),
        }
    }

    #[test]
    fn test_build_args() {
        let args = UnrarCommand::build_args(Path::new("/data/sample.rar"), "nested/test.bin", None);
        assert_eq!(
            args,
            ["p", "-inul", "-y", "-p-", "/data/sample.rar", "nested/test.bin"]
        );

        let args = UnrarCommand::build_args(Path::new("a.rar"), "x", Some("secret"));
        assert!(args.contains(&"-psecret".to_string()));
    }

    #[test]
    fn test_request_debug_redacts_password() {
        let req = request(Vec::new(), Some("hunter2"));
        let debug = format!("{:?}", req);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("redacted"));
    }

    #[tokio::test]
    async fn test_local_path_used_directly() {
        let decoder = UnrarCommand::new();
        let handle = VolumeHandle {
            index: 0,
            locator: Locator::Path(PathBuf::from("/data/sample.rar")),
            source: Arc::new(MemorySource::new("sample.rar", b"RAR".to_vec())),
        };
        let path = decoder.local_archive(&request(vec![handle], None)).await.unwrap();
        assert_eq!(path, PathBuf::from("/data/sample.rar"));
    }

    #[tokio::test]
    async fn test_memory_volumes_materialized_once() {
        let decoder = UnrarCommand::new();
        let first = memory_volume(0, "set.part1.rar", b"RAR-DATA");
        let second = memory_volume(1, "set.part2.rar", b"MORE");

        let a = decoder
            .local_archive(&request(vec![first.clone()], None))
            .await
            .unwrap();
        assert_eq!(a.file_name().unwrap(), "set.part1.rar");
        assert_eq!(std::fs::read(&a).unwrap(), b"RAR-DATA");

        let b = decoder
            .local_archive(&request(vec![first, second], None))
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            std::fs::read(b.with_file_name("set.part2.rar")).unwrap(),
            b"MORE"
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let decoder = UnrarCommand::with_program("/nonexistent/rar-seek-unrar");
        let mut sink = Vec::new();
        let req = request(vec![memory_volume(0, "a.rar", b"RAR")], None);
        let err = decoder
            .decode(&req, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RarError::DecoderUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_decoder_exit_codes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-unrar");
        std::fs::write(
            &script,
            "#!/bin/sh\ncase \"$4\" in\n  -pbad) exit 11 ;;\n  -pfail) echo broken >&2; exit 3 ;;\nesac\nprintf '%s|' \"$@\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let decoder = UnrarCommand::with_program(&script);
        let cancel = CancellationToken::new();
        let volumes = vec![memory_volume(0, "a.rar", b"RAR")];

        let mut sink = Vec::new();
        let req = request(volumes.clone(), None);
        let written = decoder.decode(&req, &mut sink, &cancel).await.unwrap();
        let output = String::from_utf8(sink).unwrap();
        assert_eq!(written as usize, output.len());
        assert!(output.starts_with("p|-inul|-y|-p-|"));
        assert!(output.ends_with("a.rar|nested/test.bin|"));

        let mut sink = Vec::new();
        let err = decoder
            .decode(&request(volumes.clone(), Some("bad")), &mut sink, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RarError::PasswordRequired { .. }));

        let mut sink = Vec::new();
        let err = decoder
            .decode(&request(volumes, Some("fail")), &mut sink, &cancel)
            .await
            .unwrap_err();
        match err {
            RarError::DecodeFailed { reason, .. } => assert!(reason.contains("broken")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
