//! 单次上传的处理流程：限流、类型检查、病毒扫描、结构校验、落盘、登记。
//!
//! 任一步失败都不会留下文件或注册表条目。

use std::fmt;
use std::io::BufReader;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::archive::{self, ArchiveRejection};
use crate::atomic::AtomicFile;
use crate::error::ApiError;
use crate::expiry::deadline_after;
use crate::ratelimit::{Admission, RateLimiter};
use crate::registry::{ObjectRegistry, StoredObject};
use crate::scanner::{MalwareScanner, ScanError, Verdict};
use crate::storage::{Storage, StorageError};

const ZIP_MIME: &str = "application/zip";
const MAX_DISPLAY_NAME_CHARS: usize = 100;
const FALLBACK_DISPLAY_NAME: &str = "world";

/// 已完整写入临时文件的一次上传。
pub struct WorldUpload {
    pub client: IpAddr,
    pub name: String,
    pub staged: AtomicFile,
}

#[derive(Debug)]
pub enum IntakeError {
    RateLimited { retry_after: Duration },
    UnsupportedType,
    EmptyUpload,
    Rejected(ArchiveRejection),
    Malicious { description: String },
    Scan(ScanError),
    Storage(StorageError),
    Internal(String),
}

impl fmt::Display for IntakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeError::RateLimited { retry_after } => {
                write!(f, "rate limited for {}s", retry_after.as_secs())
            }
            IntakeError::UnsupportedType => f.write_str("file is not a zip archive"),
            IntakeError::EmptyUpload => f.write_str("upload is empty"),
            IntakeError::Rejected(reason) => write!(f, "{reason}"),
            IntakeError::Malicious { description } => write!(f, "malware found: {description}"),
            IntakeError::Scan(err) => write!(f, "{err}"),
            IntakeError::Storage(err) => write!(f, "{err}"),
            IntakeError::Internal(msg) => f.write_str(msg),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(error: IntakeError) -> Self {
        match error {
            IntakeError::RateLimited { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                ApiError::RateLimited(secs)
            }
            IntakeError::UnsupportedType | IntakeError::EmptyUpload | IntakeError::Rejected(_) => {
                ApiError::InvalidFile
            }
            IntakeError::Malicious { .. } => ApiError::MaliciousFile,
            IntakeError::Scan(err) => ApiError::Internal(err.to_string()),
            IntakeError::Storage(err) => ApiError::Internal(err.to_string()),
            IntakeError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

pub struct IntakePipeline {
    limiter: Arc<RateLimiter>,
    registry: Arc<ObjectRegistry>,
    storage: Arc<Storage>,
    scanner: Arc<dyn MalwareScanner>,
    object_ttl: Duration,
}

impl IntakePipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        registry: Arc<ObjectRegistry>,
        storage: Arc<Storage>,
        scanner: Arc<dyn MalwareScanner>,
        object_ttl: Duration,
    ) -> Self {
        Self {
            limiter,
            registry,
            storage,
            scanner,
            object_ttl,
        }
    }

    /// 第一步：消耗一次配额。在读取请求体之前调用。
    pub async fn admit(&self, client: IpAddr) -> Result<(), IntakeError> {
        match self.limiter.admit(client).await {
            Admission::Allowed { .. } => Ok(()),
            Admission::Limited { retry_after } => Err(IntakeError::RateLimited { retry_after }),
        }
    }

    /// 第二步：按文件名判断类型，通过后在存储目录建立临时文件供请求体写入。
    pub async fn stage(
        &self,
        client: IpAddr,
        file_name: Option<&str>,
    ) -> Result<AtomicFile, IntakeError> {
        if !file_name.is_some_and(is_zip_file_name) {
            warn!(client_ip = %client, file_name = ?file_name, "rejected upload with unsupported type");
            return Err(IntakeError::UnsupportedType);
        }
        self.storage.stage().await.map_err(IntakeError::Storage)
    }

    /// 其余步骤：成功时对象已落盘并登记。失败时临时文件随 `staged` 一起删除。
    pub async fn ingest(&self, upload: WorldUpload) -> Result<StoredObject, IntakeError> {
        let WorldUpload {
            client,
            name,
            mut staged,
        } = upload;

        let size = staged.written();
        if size == 0 {
            staged.discard().await;
            return Err(IntakeError::EmptyUpload);
        }
        staged.sync().await.map_err(IntakeError::Storage)?;

        match self.scanner.scan(staged.path()).await {
            Ok(Verdict::Clean) => {}
            Ok(Verdict::Found { description }) => {
                warn!(client_ip = %client, %description, "rejected malicious upload");
                return Err(IntakeError::Malicious { description });
            }
            Err(err) => return Err(IntakeError::Scan(err)),
        }

        let path = staged.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            std::fs::File::open(&path).map(|file| archive::inspect(BufReader::new(file)))
        })
        .await
        .map_err(|err| IntakeError::Internal(err.to_string()))?
        .map_err(|err| IntakeError::Storage(err.into()))?
        .map_err(|reason| {
            warn!(client_ip = %client, %reason, "rejected invalid world archive");
            IntakeError::Rejected(reason)
        })?;

        let id = self.registry.allocate_id().await;
        if let Err(err) = self.storage.commit_object(&id, staged).await {
            self.registry.release(&id).await;
            return Err(IntakeError::Storage(err));
        }

        let object = StoredObject {
            id,
            display_name: display_name(&name),
            size,
            expires_at: deadline_after(Instant::now(), self.object_ttl),
        };
        self.registry.register(object.clone()).await;
        info!(
            id = object.id,
            name = object.display_name,
            size = object.size,
            client_ip = %client,
            ttl_secs = self.object_ttl.as_secs(),
            "world stored"
        );
        Ok(object)
    }
}

fn is_zip_file_name(file_name: &str) -> bool {
    mime_guess::from_path(file_name)
        .iter()
        .any(|mime| mime.essence_str() == ZIP_MIME)
}

/// 下载文件名：保留 Unicode，去掉引号、斜杠与控制字符。
fn display_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .take(MAX_DISPLAY_NAME_CHARS)
        .map(|c| match c {
            '"' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        FALLBACK_DISPLAY_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::tests::{build_zip, world_zip};
    use std::future::Future;
    use std::net::Ipv4Addr;
    use std::path::Path;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// 测试用扫描器：按预设结果应答并统计调用次数。
    pub(crate) struct StubScanner {
        pub(crate) outcome: fn() -> Result<Verdict, ScanError>,
        pub(crate) calls: AtomicUsize,
    }

    impl StubScanner {
        pub(crate) fn clean() -> Arc<Self> {
            Arc::new(Self {
                outcome: || Ok(Verdict::Clean),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn infected() -> Arc<Self> {
            Arc::new(Self {
                outcome: || {
                    Ok(Verdict::Found {
                        description: "Eicar-Signature".into(),
                    })
                },
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn broken() -> Arc<Self> {
            Arc::new(Self {
                outcome: || Err(ScanError::Transport("connection refused".into())),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl MalwareScanner for StubScanner {
        fn scan<'a>(
            &'a self,
            path: &'a Path,
        ) -> Pin<Box<dyn Future<Output = Result<Verdict, ScanError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // 扫描时临时文件必须已完整落盘
            assert!(path.metadata().is_ok_and(|meta| meta.len() > 0));
            let outcome = (self.outcome)();
            Box::pin(async move { outcome })
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        pipeline: IntakePipeline,
    }

    fn fixture(scanner: Arc<StubScanner>, max_uses: u32) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("worlds");
        std::fs::create_dir_all(&root).expect("create storage root");
        let storage = Arc::new(Storage::new(root));
        let (registry, _scheduler) = ObjectRegistry::new(storage.clone());
        let limiter = Arc::new(RateLimiter::new(max_uses, Duration::from_secs(6 * 3600)));
        Fixture {
            _temp: temp,
            pipeline: IntakePipeline::new(
                limiter,
                registry,
                storage,
                scanner,
                Duration::from_secs(1800),
            ),
        }
    }

    fn client() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))
    }

    async fn upload(pipeline: &IntakePipeline, file_name: &str, data: &[u8]) -> WorldUpload {
        let mut staged = pipeline
            .stage(client(), Some(file_name))
            .await
            .expect("stage");
        staged.write_all(data).await.expect("write staged");
        WorldUpload {
            client: client(),
            name: "MyWorld".into(),
            staged,
        }
    }

    fn stored_files(pipeline: &IntakePipeline) -> usize {
        std::fs::read_dir(pipeline.storage.root_path())
            .expect("read dir")
            .count()
    }

    #[tokio::test]
    async fn accepts_valid_world() {
        let fx = fixture(StubScanner::clean(), 5);
        let archive = world_zip();
        let staged = upload(&fx.pipeline, "world.zip", &archive).await;
        let object = fx.pipeline.ingest(staged).await.expect("accepted");

        assert_eq!(object.id.len(), 15);
        assert_eq!(object.display_name, "MyWorld");
        assert_eq!(object.size, archive.len() as u64);
        let found = fx.pipeline.registry.lookup(&object.id).await;
        assert_eq!(found, Some(object.clone()));
        let path = fx.pipeline.storage.object_path(&object.id).expect("path");
        assert_eq!(std::fs::read(path).expect("read"), archive);
        assert_eq!(stored_files(&fx.pipeline), 1);
    }

    #[tokio::test]
    async fn rejects_wrong_extension_before_staging() {
        let fx = fixture(StubScanner::clean(), 5);
        let result = fx.pipeline.stage(client(), Some("world.rar")).await;
        assert!(matches!(result, Err(IntakeError::UnsupportedType)));
        assert!(matches!(
            fx.pipeline.stage(client(), None).await,
            Err(IntakeError::UnsupportedType)
        ));
        assert_eq!(stored_files(&fx.pipeline), 0);
    }

    #[tokio::test]
    async fn uppercase_extension_is_accepted() {
        let fx = fixture(StubScanner::clean(), 5);
        let staged = upload(&fx.pipeline, "WORLD.ZIP", &world_zip()).await;
        assert!(fx.pipeline.ingest(staged).await.is_ok());
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_without_scanning() {
        let scanner = StubScanner::clean();
        let fx = fixture(scanner.clone(), 5);
        let staged = upload(&fx.pipeline, "world.zip", b"").await;
        let result = fx.pipeline.ingest(staged).await;
        assert!(matches!(result, Err(IntakeError::EmptyUpload)));
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(stored_files(&fx.pipeline), 0);
    }

    #[tokio::test]
    async fn invalid_archive_persists_nothing() {
        let fx = fixture(StubScanner::clean(), 5);
        let staged = upload(
            &fx.pipeline,
            "world.zip",
            &build_zip(&["world/region/r.0.0.mca"]),
        )
        .await;
        let result = fx.pipeline.ingest(staged).await;
        assert!(matches!(result, Err(IntakeError::Rejected(_))));
        assert_eq!(stored_files(&fx.pipeline), 0);
        assert_eq!(fx.pipeline.registry.live_count().await, 0);

        let staged = upload(&fx.pipeline, "world.zip", b"not a zip").await;
        assert!(matches!(
            fx.pipeline.ingest(staged).await,
            Err(IntakeError::Rejected(ArchiveRejection::Malformed(_)))
        ));
        assert_eq!(stored_files(&fx.pipeline), 0);
    }

    #[tokio::test]
    async fn malicious_verdict_rejects() {
        let fx = fixture(StubScanner::infected(), 5);
        let staged = upload(&fx.pipeline, "world.zip", &world_zip()).await;
        let result = fx.pipeline.ingest(staged).await;
        assert!(matches!(result, Err(IntakeError::Malicious { .. })));
        assert_eq!(stored_files(&fx.pipeline), 0);
    }

    #[tokio::test]
    async fn scanner_failure_fails_closed() {
        let fx = fixture(StubScanner::broken(), 5);
        let staged = upload(&fx.pipeline, "world.zip", &world_zip()).await;
        let result = fx.pipeline.ingest(staged).await;
        assert!(matches!(result, Err(IntakeError::Scan(_))));
        assert_eq!(stored_files(&fx.pipeline), 0);
        assert!(matches!(
            ApiError::from(result.err().expect("error")),
            ApiError::Internal(_)
        ));
    }

    #[tokio::test]
    async fn storage_failure_leaves_no_registry_entry() {
        let fx = fixture(StubScanner::clean(), 5);
        std::fs::remove_dir_all(fx.pipeline.storage.root_path()).expect("remove root");

        let result = fx.pipeline.stage(client(), Some("world.zip")).await;
        assert!(matches!(result, Err(IntakeError::Storage(_))));
        assert_eq!(fx.pipeline.registry.live_count().await, 0);
    }

    #[tokio::test]
    async fn oversized_ttl_does_not_panic() {
        let temp = tempdir().expect("tempdir");
        let storage = Arc::new(Storage::new(temp.path().to_path_buf()));
        let (registry, _scheduler) = ObjectRegistry::new(storage.clone());
        let pipeline = IntakePipeline::new(
            Arc::new(RateLimiter::new(5, Duration::from_secs(3600))),
            registry,
            storage,
            StubScanner::clean(),
            Duration::from_secs(u64::MAX),
        );
        let staged = upload(&pipeline, "world.zip", &world_zip()).await;
        let object = pipeline.ingest(staged).await.expect("accepted");
        assert!(object.expires_at > Instant::now() + Duration::from_secs(3600));
        assert!(pipeline.registry.lookup(&object.id).await.is_some());
    }

    #[tokio::test]
    async fn admit_enforces_quota() {
        let fx = fixture(StubScanner::clean(), 2);
        let client = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));
        assert!(fx.pipeline.admit(client).await.is_ok());
        assert!(fx.pipeline.admit(client).await.is_ok());
        let limited = fx.pipeline.admit(client).await;
        assert!(matches!(limited, Err(IntakeError::RateLimited { .. })));
        assert!(matches!(
            ApiError::from(limited.err().expect("error")),
            ApiError::RateLimited(secs) if secs > 0
        ));
    }

    #[test]
    fn display_names_are_header_safe() {
        assert_eq!(display_name("MyWorld"), "MyWorld");
        assert_eq!(display_name("  Survival 1.20  "), "Survival 1.20");
        assert_eq!(display_name(r#"a"b\c/d"#), "a_b_c_d");
        assert_eq!(display_name("tab\there\r\n"), "tab_here");
        assert_eq!(display_name("Мир"), "Мир");
        assert_eq!(display_name("我的世界"), "我的世界");
        assert_eq!(display_name(""), FALLBACK_DISPLAY_NAME);
        assert_eq!(
            display_name(&"x".repeat(500)).chars().count(),
            MAX_DISPLAY_NAME_CHARS
        );
    }
}
