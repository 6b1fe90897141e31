use super::{ErrorListener, Listener};
use crate::{NetworkResponse, Parsed, Request, RequestError, RequestHandler};
use std::{fs, path::PathBuf};
use tokio::runtime::{Handle, RuntimeFlavor};

fn blocking_io<T>(io: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(io)
        }
        _ => io(),
    }
}

/// Writes the body to `path` and yields the path.
///
/// The write happens in `parse_response` with blocking `std::fs` calls, so it
/// holds a runtime worker thread for as long as the disk takes. On a
/// multi-thread runtime it runs under `block_in_place` and the worker's other
/// tasks move elsewhere; on a current-thread runtime it stalls everything
/// until done. Pair it with
/// [`with_progress_listener`](crate::Request::with_progress_listener) to
/// follow the download itself.
pub struct DownloadHandler {
    path: PathBuf,
    on_response: Listener<PathBuf>,
    on_error: ErrorListener,
}

impl DownloadHandler {
    pub fn new(
        path: impl Into<PathBuf>,
        on_response: impl Fn(PathBuf) + Send + Sync + 'static,
        on_error: impl Fn(RequestError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            on_response: Box::new(on_response),
            on_error: Box::new(on_error),
        }
    }

    /// GET request for `url` that bypasses the response cache.
    pub fn request(self, url: &str) -> Result<Request<Self>, RequestError> {
        Ok(Request::get(url, self)?.with_should_cache(false))
    }
}

impl RequestHandler for DownloadHandler {
    type Output = PathBuf;

    fn parse_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<Parsed<PathBuf>, RequestError> {
        let file_error = |e: std::io::Error| {
            RequestError::File(format!("{}: {e}", self.path.display()))
        };
        blocking_io(|| {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, &response.data)
        })
        .map_err(file_error)?;
        Ok(Parsed::uncached(self.path.clone()))
    }

    fn deliver_response(&self, output: PathBuf) {
        (self.on_response)(output)
    }

    fn deliver_error(&self, error: RequestError) {
        (self.on_error)(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_writes_file_creating_parents() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested/dir/file.bin");
        let handler = DownloadHandler::new(&target, |_| {}, |_| {});

        let parsed = handler
            .parse_response(&NetworkResponse::new(200, HashMap::new(), vec![1, 2, 3]))
            .unwrap();
        assert_eq!(parsed.result, target);
        assert!(parsed.cache_entry.is_none());
        assert_eq!(std::fs::read(&target).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writes_file_from_runtime_worker() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("worker.bin");
        let handler = DownloadHandler::new(&target, |_| {}, |_| {});

        let parsed = handler
            .parse_response(&NetworkResponse::new(200, HashMap::new(), vec![7; 64]))
            .unwrap();
        assert_eq!(parsed.result, target);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), vec![7; 64]);
    }

    #[tokio::test]
    async fn test_writes_file_on_current_thread_runtime() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("inline.bin");
        let handler = DownloadHandler::new(&target, |_| {}, |_| {});

        handler
            .parse_response(&NetworkResponse::new(200, HashMap::new(), vec![1]))
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), vec![1]);
    }

    #[test]
    fn test_unwritable_path_is_file_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let handler = DownloadHandler::new(blocker.join("file.bin"), |_| {}, |_| {});

        let result =
            handler.parse_response(&NetworkResponse::new(200, HashMap::new(), vec![1]));
        assert!(matches!(result, Err(RequestError::File(_))));
    }

    #[test]
    fn test_download_request_is_not_cached() {
        let request = DownloadHandler::new("/tmp/x", |_| {}, |_| {})
            .request("http://example.com/file")
            .unwrap();
        assert!(!request.should_cache());
    }
}
