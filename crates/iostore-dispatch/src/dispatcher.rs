use std::path::Path;
use std::sync::Arc;

use iostore_container::{ChunkBytes, ContainerReader, ContainerResult, StoreRegistry};
use iostore_types::{ChunkId, IoErrorCode, ReadOptions};
use tracing::debug;

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::request::{Batch, BatchHandle, CompletedRequest, Request, RequestHandle, RequestResult};
use crate::slab::{AllocatorStats, BlockAllocator};

/// Owns the mount registry and the request/batch allocators.
///
/// All methods take `&self`; share one dispatcher between threads with an
/// `Arc`. Allocator locks are never held while resolving against the
/// registry, and the registry resolves from a snapshot of its mounts.
pub struct Dispatcher {
    registry: StoreRegistry,
    requests: BlockAllocator<Request>,
    batches: BlockAllocator<Batch>,
}

impl Dispatcher {
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            registry: StoreRegistry::new(),
            requests: BlockAllocator::new(config.request_block_size),
            batches: BlockAllocator::new(config.batch_block_size),
        }
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    // -- mounts ----------------------------------------------------------

    pub fn mount(&self, reader: Arc<ContainerReader>) {
        self.registry.mount(reader);
    }

    pub fn mount_with_priority(&self, reader: Arc<ContainerReader>, priority: i32) {
        self.registry.mount_with_priority(reader, priority);
    }

    pub fn unmount(&self, reader: &Arc<ContainerReader>) -> bool {
        self.registry.unmount(reader)
    }

    pub fn unmount_path(&self, base_path: &Path) -> bool {
        self.registry.unmount_path(base_path)
    }

    /// Open the container at `base_path` and mount it. Nothing is mounted if
    /// the container fails validation.
    pub fn open_and_mount(
        &self,
        base_path: impl AsRef<Path>,
        priority: i32,
    ) -> DispatchResult<Arc<ContainerReader>> {
        let reader = Arc::new(ContainerReader::open(base_path)?);
        self.registry
            .mount_with_priority(Arc::clone(&reader), priority);
        Ok(reader)
    }

    pub fn size_for_chunk(&self, id: &ChunkId) -> ContainerResult<u64> {
        self.registry.size_for_chunk(id)
    }

    /// One-shot resolve outside of any batch.
    pub fn resolve(&self, id: &ChunkId, options: ReadOptions) -> ContainerResult<ChunkBytes> {
        self.registry.resolve_with(id, options)
    }

    // -- requests and batches -------------------------------------------

    pub fn alloc_request(&self, id: ChunkId, options: ReadOptions, user_data: u64) -> RequestHandle {
        self.requests.alloc(Request::new(id, options, user_data))
    }

    /// Free a request that is not owned by a batch.
    pub fn free_request(&self, handle: RequestHandle) -> Option<Request> {
        self.requests.free(handle)
    }

    pub fn new_batch(&self) -> BatchHandle {
        self.alloc_batch(Vec::new())
    }

    /// Allocate a batch that takes ownership of `requests`, in order.
    pub fn alloc_batch(&self, requests: Vec<RequestHandle>) -> BatchHandle {
        self.batches.alloc(Batch::with_requests(requests))
    }

    /// Append a new request to an unissued batch.
    pub fn read(
        &self,
        batch: BatchHandle,
        id: ChunkId,
        options: ReadOptions,
        user_data: u64,
    ) -> DispatchResult<RequestHandle> {
        match self.batches.with(batch, |b| b.issued) {
            None => return Err(DispatchError::stale_batch()),
            Some(true) => return Err(DispatchError::BatchAlreadyIssued),
            Some(false) => {}
        }
        let request = self.alloc_request(id, options, user_data);
        // The batch may have been issued or freed since the check above.
        let appended = self.batches.with_mut(batch, |b| {
            if b.issued {
                return Err(DispatchError::BatchAlreadyIssued);
            }
            b.requests.push(request);
            Ok(())
        });
        match appended {
            Some(Ok(())) => Ok(request),
            Some(Err(e)) => {
                self.requests.free(request);
                Err(e)
            }
            None => {
                self.requests.free(request);
                Err(DispatchError::stale_batch())
            }
        }
    }

    /// Resolve every request of `batch` and store each outcome.
    ///
    /// Per-request failures land on the request; the call itself only fails
    /// for a stale or already issued batch.
    pub fn issue_batch(&self, batch: BatchHandle) -> DispatchResult<()> {
        let handles = self
            .batches
            .with_mut(batch, |b| {
                if b.issued {
                    return Err(DispatchError::BatchAlreadyIssued);
                }
                b.issued = true;
                Ok(b.requests.clone())
            })
            .ok_or_else(DispatchError::stale_batch)??;

        let mounts = self.registry.snapshot();
        let mut failed = 0usize;
        for &handle in &handles {
            let Some((id, options)) = self.requests.with(handle, |r| (r.chunk_id, r.options))
            else {
                continue;
            };
            let result = if !id.is_valid() {
                RequestResult::Failed(IoErrorCode::InvalidChunkId)
            } else {
                match mounts.resolve_with(&id, options) {
                    Ok(bytes) => RequestResult::Ok(bytes),
                    Err(e) => RequestResult::Failed(e.code()),
                }
            };
            if !result.is_ok() {
                failed += 1;
            }
            self.requests.with_mut(handle, |r| r.result = result);
        }
        debug!(
            batch = ?batch,
            requests = handles.len(),
            failed,
            mounts = mounts.readers().len(),
            "issued batch"
        );
        Ok(())
    }

    /// `true` once every request of the batch has left `Unknown`.
    pub fn is_batch_ready(&self, batch: BatchHandle) -> DispatchResult<bool> {
        let handles = self.batch_requests(batch)?;
        Ok(handles.into_iter().all(|h| {
            self.requests
                .with(h, |r| r.result.is_ready())
                .unwrap_or(true)
        }))
    }

    pub fn is_batch_issued(&self, batch: BatchHandle) -> DispatchResult<bool> {
        self.batches
            .with(batch, |b| b.issued)
            .ok_or_else(DispatchError::stale_batch)
    }

    pub fn batch_requests(&self, batch: BatchHandle) -> DispatchResult<Vec<RequestHandle>> {
        self.batches
            .with(batch, |b| b.requests.clone())
            .ok_or_else(DispatchError::stale_batch)
    }

    /// Copy of the request, or `None` if the handle is stale.
    pub fn request(&self, handle: RequestHandle) -> Option<Request> {
        self.requests.with(handle, Request::clone)
    }

    pub fn request_result(&self, handle: RequestHandle) -> DispatchResult<RequestResult> {
        self.requests
            .with(handle, |r| r.result.clone())
            .ok_or_else(DispatchError::stale_request)
    }

    /// Visit the batch's requests in order.
    ///
    /// `f` receives a copy of each request, so it may call back into the
    /// dispatcher.
    pub fn for_each_request(
        &self,
        batch: BatchHandle,
        mut f: impl FnMut(RequestHandle, &Request),
    ) -> DispatchResult<()> {
        for handle in self.batch_requests(batch)? {
            if let Some(request) = self.request(handle) {
                f(handle, &request);
            }
        }
        Ok(())
    }

    pub fn batch_results(&self, batch: BatchHandle) -> DispatchResult<Vec<CompletedRequest>> {
        let mut results = Vec::new();
        self.for_each_request(batch, |_, r| results.push(CompletedRequest::from(r.clone())))?;
        Ok(results)
    }

    /// Free every request the batch owns, then the batch. Returns the number
    /// of requests freed.
    pub fn free_batch(&self, batch: BatchHandle) -> DispatchResult<usize> {
        let handles = self.detach_batch(batch).ok_or_else(DispatchError::stale_batch)?;
        Ok(handles
            .into_iter()
            .filter(|&h| self.requests.free(h).is_some())
            .count())
    }

    /// Free the batch but keep its requests alive, handing them back in
    /// order.
    pub(crate) fn detach_batch(&self, batch: BatchHandle) -> Option<Vec<RequestHandle>> {
        self.batches.free(batch).map(|b| b.requests)
    }

    // -- memory ----------------------------------------------------------

    /// Release allocator blocks that hold no live element. Returns the
    /// number of blocks released.
    pub fn trim(&self) -> usize {
        let released = self.requests.trim() + self.batches.trim();
        debug!(released, "trimmed dispatcher allocators");
        released
    }

    pub fn request_stats(&self) -> AllocatorStats {
        self.requests.stats()
    }

    pub fn batch_stats(&self) -> AllocatorStats {
        self.batches.stats()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(&DispatcherConfig::default())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("requests", &self.requests)
            .field("batches", &self.batches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iostore_container::testutil::{chunk_id, write_chunks, write_container};
    use iostore_container::TocEntry;

    fn small_config() -> DispatcherConfig {
        DispatcherConfig {
            request_block_size: 4,
            batch_block_size: 2,
        }
    }

    #[test]
    fn example_container_through_a_batch() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0u8..24).collect();
        let (a, b, c) = (chunk_id(b"A"), chunk_id(b"B"), chunk_id(b"C"));
        let base = write_container(
            dir.path(),
            "example",
            &[TocEntry::new(a, 0, 16), TocEntry::new(b, 16, 8)],
            &data,
        );

        let dispatcher = Dispatcher::default();
        dispatcher.open_and_mount(&base, 0).unwrap();

        let batch = dispatcher.new_batch();
        let ra = dispatcher.read(batch, a, ReadOptions::whole(), 1).unwrap();
        let rb = dispatcher.read(batch, b, ReadOptions::whole(), 2).unwrap();
        let rc = dispatcher.read(batch, c, ReadOptions::whole(), 3).unwrap();
        assert!(!dispatcher.is_batch_ready(batch).unwrap());

        dispatcher.issue_batch(batch).unwrap();
        assert!(dispatcher.is_batch_ready(batch).unwrap());

        let result = dispatcher.request_result(ra).unwrap();
        assert_eq!(result.bytes().unwrap().as_slice(), &data[0..16]);
        let result = dispatcher.request_result(rb).unwrap();
        assert_eq!(result.bytes().unwrap().as_slice(), &data[16..24]);
        assert_eq!(
            dispatcher.request_result(rc).unwrap(),
            RequestResult::Failed(IoErrorCode::NotFound)
        );

        let user_data: Vec<u64> = dispatcher
            .batch_results(batch)
            .unwrap()
            .iter()
            .map(|r| r.user_data)
            .collect();
        assert_eq!(user_data, vec![1, 2, 3]);

        assert_eq!(dispatcher.free_batch(batch).unwrap(), 3);
        assert!(dispatcher.request(ra).is_none());
        assert_eq!(dispatcher.request_stats().live, 0);
    }

    #[test]
    fn corrupt_container_is_not_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_container(
            dir.path(),
            "bad",
            &[TocEntry::new(chunk_id(b"C"), 20, 16)],
            &[0u8; 24],
        );
        let dispatcher = Dispatcher::default();
        let err = dispatcher.open_and_mount(&base, 0).unwrap_err();
        match err {
            DispatchError::Container(e) => assert_eq!(e.code(), IoErrorCode::CorruptToc),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(dispatcher.registry().mounted_count(), 0);
    }

    #[test]
    fn invalid_chunk_id_fails_without_probing() {
        let dispatcher = Dispatcher::default();
        let batch = dispatcher.new_batch();
        let r = dispatcher
            .read(batch, ChunkId::INVALID, ReadOptions::whole(), 0)
            .unwrap();
        dispatcher.issue_batch(batch).unwrap();
        assert_eq!(
            dispatcher.request_result(r).unwrap().error(),
            Some(IoErrorCode::InvalidChunkId)
        );
    }

    #[test]
    fn read_options_window_the_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let id = chunk_id(b"w");
        let base = write_chunks(dir.path(), "w", &[(id, "0123456789")]);
        let dispatcher = Dispatcher::default();
        dispatcher.open_and_mount(&base, 0).unwrap();

        let batch = dispatcher.new_batch();
        let mid = dispatcher.read(batch, id, ReadOptions::new(2, 3), 0).unwrap();
        let tail = dispatcher.read(batch, id, ReadOptions::new(7, 100), 0).unwrap();
        let past = dispatcher.read(batch, id, ReadOptions::new(11, 1), 0).unwrap();
        dispatcher.issue_batch(batch).unwrap();

        let bytes = |h| {
            dispatcher
                .request_result(h)
                .unwrap()
                .bytes()
                .map(|b| b.as_slice().to_vec())
                .unwrap()
        };
        assert_eq!(bytes(mid), b"234");
        assert_eq!(bytes(tail), b"789");
        assert!(bytes(past).is_empty());
    }

    #[test]
    fn issued_batch_is_frozen() {
        let dispatcher = Dispatcher::default();
        let batch = dispatcher.new_batch();
        dispatcher
            .read(batch, chunk_id(b"x"), ReadOptions::whole(), 0)
            .unwrap();
        dispatcher.issue_batch(batch).unwrap();
        assert!(dispatcher.is_batch_issued(batch).unwrap());

        assert!(matches!(
            dispatcher.issue_batch(batch),
            Err(DispatchError::BatchAlreadyIssued)
        ));
        assert!(matches!(
            dispatcher.read(batch, chunk_id(b"y"), ReadOptions::whole(), 0),
            Err(DispatchError::BatchAlreadyIssued)
        ));
        assert_eq!(dispatcher.batch_requests(batch).unwrap().len(), 1);
        assert_eq!(dispatcher.request_stats().live, 1);
    }

    #[test]
    fn freed_batch_handle_is_stale() {
        let dispatcher = Dispatcher::default();
        let batch = dispatcher.new_batch();
        dispatcher.free_batch(batch).unwrap();
        assert!(matches!(
            dispatcher.issue_batch(batch),
            Err(DispatchError::StaleHandle { kind: "batch" })
        ));
        assert!(dispatcher.free_batch(batch).is_err());
        assert!(dispatcher.is_batch_ready(batch).is_err());
    }

    #[test]
    fn empty_batch_is_ready_after_issue() {
        let dispatcher = Dispatcher::default();
        let batch = dispatcher.new_batch();
        dispatcher.issue_batch(batch).unwrap();
        assert!(dispatcher.is_batch_ready(batch).unwrap());
        assert_eq!(dispatcher.free_batch(batch).unwrap(), 0);
    }

    #[test]
    fn alloc_batch_takes_prebuilt_requests() {
        let dispatcher = Dispatcher::default();
        let first = dispatcher.alloc_request(chunk_id(b"1"), ReadOptions::whole(), 10);
        let second = dispatcher.alloc_request(chunk_id(b"2"), ReadOptions::whole(), 20);
        let batch = dispatcher.alloc_batch(vec![first, second]);
        assert_eq!(dispatcher.batch_requests(batch).unwrap(), vec![first, second]);

        let mut seen = Vec::new();
        dispatcher
            .for_each_request(batch, |h, r| seen.push((h, r.user_data)))
            .unwrap();
        assert_eq!(seen, vec![(first, 10), (second, 20)]);
    }

    #[test]
    fn results_outlive_unmount() {
        let dir = tempfile::tempdir().unwrap();
        let id = chunk_id(b"keep");
        let base = write_chunks(dir.path(), "keep", &[(id, "kept bytes")]);
        let dispatcher = Dispatcher::default();
        let reader = dispatcher.open_and_mount(&base, 0).unwrap();

        let batch = dispatcher.new_batch();
        let r = dispatcher.read(batch, id, ReadOptions::whole(), 0).unwrap();
        dispatcher.issue_batch(batch).unwrap();
        assert!(dispatcher.unmount(&reader));
        drop(reader);

        let result = dispatcher.request_result(r).unwrap();
        assert_eq!(result.bytes().unwrap().as_slice(), b"kept bytes");
        assert!(dispatcher.resolve(&id, ReadOptions::whole()).is_err());
    }

    #[test]
    fn higher_priority_mount_wins() {
        let dir = tempfile::tempdir().unwrap();
        let id = chunk_id(b"shared");
        let base = write_chunks(dir.path(), "base", &[(id, "base")]);
        let patch = write_chunks(dir.path(), "patch", &[(id, "patch")]);
        let dispatcher = Dispatcher::default();
        dispatcher.open_and_mount(&base, 0).unwrap();
        dispatcher.open_and_mount(&patch, 1).unwrap();

        let bytes = dispatcher.resolve(&id, ReadOptions::whole()).unwrap();
        assert_eq!(bytes.as_slice(), b"patch");
        assert_eq!(dispatcher.size_for_chunk(&id).unwrap(), 5);

        assert!(dispatcher.unmount_path(&patch));
        assert_eq!(dispatcher.size_for_chunk(&id).unwrap(), 4);
    }

    #[test]
    fn batch_cycles_reuse_one_block_and_trim_releases_it() {
        let dispatcher = Dispatcher::new(&small_config());
        for round in 0..50u64 {
            let batch = dispatcher.new_batch();
            for i in 0..4 {
                dispatcher
                    .read(batch, chunk_id(&[i as u8]), ReadOptions::whole(), round)
                    .unwrap();
            }
            dispatcher.issue_batch(batch).unwrap();
            assert_eq!(dispatcher.free_batch(batch).unwrap(), 4);
        }
        assert_eq!(dispatcher.request_stats().blocks, 1);
        assert_eq!(dispatcher.batch_stats().blocks, 1);

        assert_eq!(dispatcher.trim(), 2);
        assert_eq!(dispatcher.request_stats().blocks, 0);
        assert_eq!(dispatcher.batch_stats().blocks, 0);
    }

    #[test]
    fn concurrent_batches_from_many_threads() {
        let dir = tempfile::tempdir().unwrap();
        let chunks: Vec<(ChunkId, String)> = (0u8..8)
            .map(|i| (chunk_id(&[i]), format!("payload-{i}")))
            .collect();
        let base = write_chunks(dir.path(), "many", &chunks);
        let dispatcher = Dispatcher::new(&small_config());
        dispatcher.open_and_mount(&base, 0).unwrap();

        std::thread::scope(|s| {
            for t in 0..4u64 {
                let dispatcher = &dispatcher;
                let chunks = &chunks;
                s.spawn(move || {
                    for _ in 0..25 {
                        let batch = dispatcher.new_batch();
                        for (id, _) in chunks {
                            dispatcher.read(batch, *id, ReadOptions::whole(), t).unwrap();
                        }
                        dispatcher.issue_batch(batch).unwrap();
                        for (done, (_, payload)) in
                            dispatcher.batch_results(batch).unwrap().iter().zip(chunks)
                        {
                            assert_eq!(done.user_data, t);
                            assert_eq!(done.result.bytes().unwrap().as_slice(), payload.as_bytes());
                        }
                        dispatcher.free_batch(batch).unwrap();
                    }
                });
            }
        });
        assert_eq!(dispatcher.request_stats().live, 0);
        assert_eq!(dispatcher.batch_stats().live, 0);
    }
}
