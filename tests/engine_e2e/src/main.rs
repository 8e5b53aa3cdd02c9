fn main() {
    println!("Run `cargo test -p engine-e2e` to execute end-to-end engine tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chunkflow_engine::{
        EngineConfig, EngineEvent, JsonFileStore, MemoryStore, PersistenceStore, SessionStatus,
        Transport, TransportFuture, UploadEngine,
    };
    use chunkflow_protocol::{
        AppendRequest, AppendResponse, CreateRequest, CreateResponse, ProbeRequest, ProbeResponse,
        TransportError,
    };
    use chunkflow_transfer::{BlobCache, FileDescriptor, FileSource, MemorySource};
    use tokio::sync::mpsc;

    struct Upload {
        size: u64,
        data: Vec<u8>,
    }

    /// In-memory upload server speaking the create/probe/append protocol.
    ///
    /// Applies appends only at the current end of the resource, exactly
    /// like a real server, and keeps the received bytes so tests can
    /// check that resumed uploads produce neither gaps nor duplicates.
    #[derive(Default)]
    struct UploadServer {
        uploads: Mutex<HashMap<String, Upload>>,
        next_id: AtomicU32,
        append_count: AtomicUsize,
        /// Scripted failures keyed by global append ordinal (1-based).
        failures: Mutex<HashMap<usize, TransportError>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        append_delay: Option<Duration>,
    }

    /// Decrements the in-flight gauge even when the engine drops the
    /// append future mid-request.
    struct InFlight<'a>(&'a UploadServer);

    impl<'a> InFlight<'a> {
        fn enter(server: &'a UploadServer) -> Self {
            let current = server.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            server.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            Self(server)
        }
    }

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl UploadServer {
        fn with_delay(millis: u64) -> Self {
            Self {
                append_delay: Some(Duration::from_millis(millis)),
                ..Self::default()
            }
        }

        fn fail_append(&self, ordinal: usize, err: TransportError) {
            self.failures.lock().unwrap().insert(ordinal, err);
        }

        fn appends(&self) -> usize {
            self.append_count.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }

        /// Bytes the single upload holds; panics unless exactly one
        /// resource exists.
        fn only_upload(&self) -> Vec<u8> {
            let uploads = self.uploads.lock().unwrap();
            assert_eq!(uploads.len(), 1, "expected exactly one upload");
            uploads.values().next().unwrap().data.clone()
        }

        /// Simulates a chunk that was applied server-side but whose
        /// acknowledgment never reached the client.
        fn apply_unacked_chunk(&self, bytes: &[u8]) {
            let mut uploads = self.uploads.lock().unwrap();
            assert_eq!(uploads.len(), 1, "expected exactly one upload");
            uploads.values_mut().next().unwrap().data.extend_from_slice(bytes);
        }
    }

    impl Transport for UploadServer {
        fn create(&self, req: CreateRequest) -> TransportFuture<'_, CreateResponse> {
            Box::pin(async move {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                let url = format!("up://{n}");
                self.uploads.lock().unwrap().insert(
                    url.clone(),
                    Upload {
                        size: req.total_size,
                        data: Vec::new(),
                    },
                );
                Ok(CreateResponse { remote_url: url })
            })
        }

        fn probe(&self, req: ProbeRequest) -> TransportFuture<'_, ProbeResponse> {
            Box::pin(async move {
                let uploads = self.uploads.lock().unwrap();
                match uploads.get(&req.remote_url) {
                    Some(upload) => Ok(ProbeResponse {
                        offset: upload.data.len() as u64,
                        size: upload.size,
                    }),
                    None => Err(TransportError::Server(404)),
                }
            })
        }

        fn append(&self, req: AppendRequest) -> TransportFuture<'_, AppendResponse> {
            Box::pin(async move {
                let _gauge = InFlight::enter(self);
                if let Some(delay) = self.append_delay {
                    tokio::time::sleep(delay).await;
                }
                let ordinal = self.append_count.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(err) = self.failures.lock().unwrap().remove(&ordinal) {
                    return Err(err);
                }
                let mut uploads = self.uploads.lock().unwrap();
                let Some(upload) = uploads.get_mut(&req.remote_url) else {
                    return Err(TransportError::Server(404));
                };
                let server_offset = upload.data.len() as u64;
                if req.offset != server_offset {
                    return Err(TransportError::OffsetMismatch { server_offset });
                }
                upload.data.extend_from_slice(&req.data);
                Ok(AppendResponse {
                    offset: upload.data.len() as u64,
                })
            })
        }
    }

    struct StaticBlobCache(HashMap<String, Vec<u8>>);

    impl BlobCache for StaticBlobCache {
        fn blob(&self, fingerprint: &str) -> Option<Box<dyn FileSource>> {
            self.0
                .get(fingerprint)
                .map(|data| Box::new(MemorySource::new(data.clone())) as Box<dyn FileSource>)
        }
    }

    fn config(chunk_size: u64) -> EngineConfig {
        EngineConfig {
            chunk_size,
            ..EngineConfig::default()
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<EngineEvent>) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn wait_for(
        rx: &mut mpsc::Receiver<EngineEvent>,
        want: impl Fn(&EngineEvent) -> bool,
    ) -> EngineEvent {
        loop {
            let event = next_event(rx).await;
            if let EngineEvent::Failed { reason, .. } = &event
                && !want(&event)
            {
                panic!("upload failed unexpectedly: {reason}");
            }
            if want(&event) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ten_files_complete_within_concurrency_limit() {
        let server = Arc::new(UploadServer::with_delay(5));
        let engine = UploadEngine::new(server.clone(), Box::new(MemoryStore::new()), config(8));
        let mut rx = engine.take_events().unwrap();

        for i in 0..10u8 {
            let name = format!("file{i}.bin");
            let descriptor =
                FileDescriptor::new(&name, 80, "application/octet-stream", 1_700_000_000_000);
            engine
                .add(descriptor, Box::new(MemorySource::new(vec![i; 80])))
                .unwrap();
        }

        let mut completed = 0;
        while completed < 10 {
            match next_event(&mut rx).await {
                EngineEvent::Completed { .. } => completed += 1,
                EngineEvent::Failed { reason, .. } => panic!("upload failed: {reason}"),
                _ => {}
            }
        }

        // 10 files x 80 bytes in 8-byte chunks, none held more than the
        // three allowed slots at once.
        assert_eq!(server.appends(), 100);
        assert!(server.peak() <= 3, "peak concurrency was {}", server.peak());
        for upload in server.uploads.lock().unwrap().values() {
            assert_eq!(upload.data.len(), 80);
        }
        assert!(
            engine
                .sessions()
                .iter()
                .all(|s| s.status == SessionStatus::Completed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_server_error_retries_and_delivers_every_byte() {
        let server = Arc::new(UploadServer::default());
        server.fail_append(3, TransportError::Server(500));
        let engine = UploadEngine::new(server.clone(), Box::new(MemoryStore::new()), config(8));
        let mut rx = engine.take_events().unwrap();

        let content: Vec<u8> = (0..80u8).collect();
        let descriptor =
            FileDescriptor::new("flaky.bin", 80, "application/octet-stream", 1_700_000_000_000);
        engine
            .add(descriptor, Box::new(MemorySource::new(content.clone())))
            .unwrap();

        let mut retries = 0;
        loop {
            match next_event(&mut rx).await {
                EngineEvent::Retrying { attempt, .. } => {
                    assert_eq!(attempt, 2);
                    retries += 1;
                }
                EngineEvent::Completed { .. } => break,
                EngineEvent::Failed { reason, .. } => panic!("upload failed: {reason}"),
                _ => {}
            }
        }

        assert_eq!(retries, 1);
        // 10 successful appends plus the one scripted failure.
        assert_eq!(server.appends(), 11);
        assert_eq!(server.only_upload(), content);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_adopts_server_offset_after_lost_ack() {
        let server = Arc::new(UploadServer::with_delay(5));
        let engine = UploadEngine::new(server.clone(), Box::new(MemoryStore::new()), config(8));
        let mut rx = engine.take_events().unwrap();

        let content = vec![7u8; 80];
        let descriptor =
            FileDescriptor::new("paused.bin", 80, "application/octet-stream", 1_700_000_000_000);
        let id = engine
            .add(descriptor, Box::new(MemorySource::new(content.clone())))
            .unwrap();

        wait_for(&mut rx, |e| matches!(e, EngineEvent::Progress { .. })).await;
        engine.pause(&id).unwrap();
        wait_for(&mut rx, |e| matches!(e, EngineEvent::Paused { .. })).await;
        let local_offset = engine.session(&id).unwrap().offset;

        // One more chunk landed server-side but its ack never arrived.
        server.apply_unacked_chunk(&content[local_offset as usize..local_offset as usize + 8]);

        engine.resume(&id).unwrap();
        wait_for(&mut rx, |e| matches!(e, EngineEvent::Completed { .. })).await;

        // The probe moved the session past the unacked chunk; nothing was
        // sent twice and nothing is missing.
        assert_eq!(engine.session(&id).unwrap().offset, 80);
        assert_eq!(server.only_upload(), content);
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_survives_restart_and_upload_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploads.json");
        let server = Arc::new(UploadServer::with_delay(5));

        let content = vec![9u8; 80];
        let descriptor =
            FileDescriptor::new("restart.bin", 80, "application/octet-stream", 1_700_000_000_000);
        let fingerprint = descriptor.fingerprint();

        // First process: upload a few chunks, then stop.
        let interrupted_offset = {
            let store = JsonFileStore::new(path.clone()).unwrap();
            let engine = UploadEngine::new(server.clone(), Box::new(store), config(8));
            let mut rx = engine.take_events().unwrap();
            let id = engine
                .add(descriptor, Box::new(MemorySource::new(content.clone())))
                .unwrap();
            for _ in 0..3 {
                wait_for(&mut rx, |e| matches!(e, EngineEvent::Progress { .. })).await;
            }
            engine.pause(&id).unwrap();
            wait_for(&mut rx, |e| matches!(e, EngineEvent::Paused { .. })).await;
            engine.session(&id).unwrap().offset
        };
        assert!(interrupted_offset >= 24);

        // The checkpoint on disk matches the confirmed offset.
        let records = JsonFileStore::new(path.clone()).unwrap().list_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fingerprint, fingerprint);
        assert_eq!(records[0].offset, interrupted_offset);

        // Second process: recover from the store, blob still cached.
        let engine = UploadEngine::new(
            server.clone(),
            Box::new(JsonFileStore::new(path.clone()).unwrap()),
            config(8),
        );
        let mut rx = engine.take_events().unwrap();
        engine.set_blob_cache(Box::new(StaticBlobCache(HashMap::from([(
            fingerprint.clone(),
            content.clone(),
        )]))));
        let before = server.appends();
        let ids = engine.recover().unwrap();
        assert_eq!(ids.len(), 1);

        wait_for(&mut rx, |e| matches!(e, EngineEvent::Completed { .. })).await;
        assert_eq!(engine.session(&ids[0]).unwrap().offset, 80);
        assert_eq!(server.only_upload(), content);
        // Only the remaining chunks were sent after the restart.
        assert_eq!(
            server.appends() - before,
            ((80 - interrupted_offset) / 8) as usize
        );

        // The finished upload leaves no checkpoint behind.
        let records = JsonFileStore::new(path).unwrap().list_all().unwrap();
        assert!(records.is_empty());
    }
}
