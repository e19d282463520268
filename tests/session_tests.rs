use sercom::{
    ChannelSink, DeviceId, DisconnectReason, EventSink, FanoutSink, FlowControl, InboundRecord,
    LineEnding, LogEntry, MockTransport, OutboundRecord, Parity, PortCatalog, PortConfig,
    RecordLog, SerialSession, SessionError, SessionEvent, SessionOptions, SessionState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

/// Serial session lifecycle tests against scripted devices
#[cfg(test)]
mod session_tests {
    use super::*;

    const DEVICE: &str = "COM-TEST";

    fn test_options() -> SessionOptions {
        SessionOptions {
            write_timeout_ms: 200,
            read_poll_ms: 5,
            read_buffer_size: 64,
            ..SessionOptions::default()
        }
    }

    fn setup() -> (Arc<MockTransport>, sercom::MockDevice, RecordLog, SerialSession) {
        let transport = Arc::new(MockTransport::new());
        let device = transport.add_device(DEVICE);
        let log = RecordLog::new(100);
        let session = SerialSession::new(transport.clone(), Arc::new(log.clone()), test_options());
        (transport, device, log, session)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_ping_pong_scenario() {
        let (_transport, device, log, session) = setup();

        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(log.state(), SessionState::Open);

        let sent = session.write(b"PING\n").await.unwrap();
        assert_eq!(sent.text(), "PING\n");
        assert_eq!(sent.size(), 5);
        assert_eq!(device.written(), b"PING\n");
        assert_eq!(log.sent_text(), "PING\n");

        device.push(b"PONG\n");
        wait_until(|| log.received_text() == "PONG\n").await;

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(log.state(), SessionState::Closed);
        assert!(!device.is_open());

        // Nothing is delivered once close has returned.
        let before = log.len();
        device.push(b"LATE\n");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.len(), before);
        assert!(!log.received_text().contains("LATE"));
    }

    #[tokio::test]
    async fn test_records_keep_arrival_order() {
        let (_transport, device, log, session) = setup();
        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();

        for i in 0..20 {
            device.push(format!("line {}\n", i).as_bytes());
        }
        let expected: String = (0..20).map(|i| format!("line {}\n", i)).collect();
        wait_until(|| log.received_text() == expected).await;

        let records = log.received();
        for pair in records.windows(2) {
            assert!(pair[0].timestamp() <= pair[1].timestamp());
        }
        session.close().await;
    }

    #[tokio::test]
    async fn test_second_open_is_rejected() {
        let (transport, _device, log, session) = setup();
        transport.add_device("COM-OTHER");

        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();
        let result = session
            .open(DeviceId::from("COM-OTHER"), PortConfig::default())
            .await;

        assert_eq!(
            result,
            Err(SessionError::AlreadyOpen {
                device: DEVICE.to_string()
            })
        );
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.device(), Some(DeviceId::from(DEVICE)));
        assert_eq!(log.state(), SessionState::Open);
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_transport, _device, log, session) = setup();

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(log.entries().is_empty());

        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_read_error_faults_and_reopen_succeeds() {
        let (_transport, device, log, session) = setup();
        let config = PortConfig::new(115200, 8, 1, Parity::None, FlowControl::None).unwrap();

        session.open(DeviceId::from(DEVICE), config).await.unwrap();
        device.fail_read("device reports I/O error");

        wait_until(|| session.state() == SessionState::Faulted).await;
        assert_eq!(log.state(), SessionState::Faulted);
        assert!(log
            .last_reason()
            .unwrap()
            .contains("device reports I/O error"));
        assert!(matches!(
            session.disconnect_reason(),
            Some(DisconnectReason::StreamError(_))
        ));
        wait_until(|| !device.is_open()).await;

        // Writes on a faulted session are refused without touching the device.
        assert_eq!(session.write(b"x").await, Err(SessionError::NotOpen));

        session.open(DeviceId::from(DEVICE), config).await.unwrap();
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(device.applied_configs(), vec![config, config]);

        device.push(b"back\n");
        wait_until(|| log.received_text() == "back\n").await;
        session.close().await;
    }

    #[tokio::test]
    async fn test_unplug_reports_end_of_stream() {
        let (transport, device, log, session) = setup();
        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();

        transport.remove_device(&DeviceId::from(DEVICE));
        wait_until(|| session.state() == SessionState::Faulted).await;

        assert_eq!(session.disconnect_reason(), Some(DisconnectReason::EndOfStream));
        assert_eq!(log.last_reason().as_deref(), Some("Device disconnected"));
        wait_until(|| !device.is_open()).await;

        let reopen = session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await;
        assert!(matches!(reopen, Err(SessionError::DeviceUnavailable { .. })));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_open_nonexistent_device() {
        let (_transport, _device, log, session) = setup();

        let result = session
            .open(DeviceId::from("COM-MISSING"), PortConfig::default())
            .await;

        assert!(matches!(
            result,
            Err(SessionError::DeviceUnavailable { ref device, .. }) if device == "COM-MISSING"
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(log.entries().is_empty());
        assert_eq!(log.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_busy_and_rejected_devices_stay_closed() {
        let (_transport, device, _log, session) = setup();

        device.set_busy(true);
        let busy = session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await;
        assert!(matches!(busy, Err(SessionError::DeviceUnavailable { .. })));
        assert_eq!(session.state(), SessionState::Closed);

        device.set_busy(false);
        device.reject_config(true);
        let rejected = session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await;
        assert!(matches!(rejected, Err(SessionError::ConfigRejected { .. })));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!device.is_open());
    }

    #[tokio::test]
    async fn test_write_failure_faults_session() {
        let (_transport, device, log, session) = setup();
        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();

        device.fail_writes();
        let result = session.write(b"data").await;

        assert!(matches!(result, Err(SessionError::WriteFailed { .. })));
        assert_eq!(session.state(), SessionState::Faulted);
        assert!(matches!(
            session.disconnect_reason(),
            Some(DisconnectReason::WriteFailed(_))
        ));
        assert_eq!(log.state(), SessionState::Faulted);
        wait_until(|| !device.is_open()).await;
    }

    #[tokio::test]
    async fn test_stalled_write_times_out() {
        let (_transport, device, _log, session) = setup();
        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();

        device.stall_writes(Duration::from_millis(600));
        let result = session.write(b"slow").await;

        match result {
            Err(SessionError::WriteFailed { message }) => assert!(message.contains("timed out")),
            other => panic!("expected write timeout, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Faulted);
        // The stuck write has given the device back by the time write returns.
        assert!(!device.is_open());

        device.stall_writes(Duration::ZERO);
        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Open);
        session.close().await;
    }

    #[tokio::test]
    async fn test_send_line_appends_line_ending() {
        let transport = Arc::new(MockTransport::new());
        let device = transport.add_device(DEVICE);
        let options = test_options().with_line_ending(LineEnding::CrLf);
        let session = SerialSession::new(transport, Arc::new(RecordLog::new(10)), options);

        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();
        let record = session.send_line("AT").await.unwrap();
        session.write(b"raw").await.unwrap();

        assert_eq!(record.text(), "AT\r\n");
        assert_eq!(device.written(), b"AT\r\nraw");
        session.close().await;
    }

    #[tokio::test]
    async fn test_split_multibyte_char_across_chunks() {
        let (_transport, device, log, session) = setup();
        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();

        // "€" is E2 82 AC
        device.push(&[0xE2]);
        tokio::time::sleep(Duration::from_millis(30)).await;
        device.push(&[0x82, 0xAC, b'\n']);

        wait_until(|| log.received_text() == "€\n").await;
        assert!(!log.received_text().contains('\u{FFFD}'));
        session.close().await;
    }

    #[tokio::test]
    async fn test_channel_sink_event_sequence() {
        let transport = Arc::new(MockTransport::new());
        let device = transport.add_device(DEVICE);
        let (channel, mut events) = ChannelSink::new();
        let log = RecordLog::new(10);
        let sink = FanoutSink::new()
            .with(Arc::new(channel))
            .with(Arc::new(log.clone()));
        let session = SerialSession::new(transport, Arc::new(sink), test_options());

        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();
        session.write(b"hi").await.unwrap();
        device.push(b"yo");
        wait_until(|| log.received_text() == "yo").await;
        session.close().await;

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }

        assert!(matches!(
            received.first(),
            Some(SessionEvent::StateChanged { state: SessionState::Open, reason: None })
        ));
        assert!(matches!(&received[1], SessionEvent::Sent(r) if r.text() == "hi"));
        assert!(matches!(&received[2], SessionEvent::Received(r) if r.text() == "yo"));
        assert!(matches!(
            received.last(),
            Some(SessionEvent::StateChanged { state: SessionState::Closed, reason: None })
        ));
        assert!(matches!(log.entries()[0], LogEntry::Sent(_)));
    }

    #[tokio::test]
    async fn test_catalog_reflects_hotplug() {
        let transport = MockTransport::new();
        assert!(transport.list_ports().is_empty());

        transport.add_device("/dev/ttyUSB1");
        transport.add_device("/dev/ttyUSB0");
        assert_eq!(
            transport.list_ports(),
            vec![DeviceId::from("/dev/ttyUSB0"), DeviceId::from("/dev/ttyUSB1")]
        );

        transport.remove_device(&DeviceId::from("/dev/ttyUSB0"));
        assert_eq!(transport.list_ports(), vec![DeviceId::from("/dev/ttyUSB1")]);
    }

    /// Sink that queries its own session from inside every callback
    #[derive(Default)]
    struct StateQueryingSink {
        session: OnceLock<Weak<SerialSession>>,
        seen: Mutex<Vec<(String, Option<SessionState>)>>,
    }

    impl StateQueryingSink {
        fn observe(&self, event: String) {
            let state = self
                .session
                .get()
                .and_then(Weak::upgrade)
                .map(|session| session.state());
            self.seen.lock().unwrap().push((event, state));
        }

        fn seen(&self) -> Vec<(String, Option<SessionState>)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl EventSink for StateQueryingSink {
        fn on_record(&self, record: InboundRecord) {
            self.observe(format!("rx {}", record.text()));
        }

        fn on_state_change(&self, state: SessionState, _reason: Option<String>) {
            self.observe(format!("state {}", state));
        }

        fn on_sent(&self, record: OutboundRecord) {
            self.observe(format!("tx {}", record.text()));
        }
    }

    #[tokio::test]
    async fn test_sink_can_query_session_from_callbacks() {
        let transport = Arc::new(MockTransport::new());
        let device = transport.add_device(DEVICE);
        let sink = Arc::new(StateQueryingSink::default());
        let session = Arc::new(SerialSession::new(transport, sink.clone(), test_options()));
        let _ = sink.session.set(Arc::downgrade(&session));

        let run = async {
            session
                .open(DeviceId::from(DEVICE), PortConfig::default())
                .await
                .unwrap();
            session.write(b"hi").await.unwrap();
            device.push(b"yo\n");
            wait_until(|| sink.seen().iter().any(|(event, _)| event.starts_with("rx"))).await;
            session.close().await;
        };
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("sink callback deadlocked the session");

        let seen = sink.seen();
        assert_eq!(seen.first().unwrap().1, Some(SessionState::Open));
        assert!(seen.contains(&("tx hi".to_string(), Some(SessionState::Open))));
        assert!(seen.contains(&("rx yo\n".to_string(), Some(SessionState::Open))));
        assert_eq!(
            seen.last().unwrap(),
            &("state Closed".to_string(), Some(SessionState::Closed))
        );
    }

    #[tokio::test]
    async fn test_sink_faulted_callback_sees_faulted_state() {
        let transport = Arc::new(MockTransport::new());
        let device = transport.add_device(DEVICE);
        let sink = Arc::new(StateQueryingSink::default());
        let session = Arc::new(SerialSession::new(transport, sink.clone(), test_options()));
        let _ = sink.session.set(Arc::downgrade(&session));

        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();
        device.fail_read("cable pulled");
        wait_until(|| session.state() == SessionState::Faulted).await;
        wait_until(|| sink.seen().len() >= 2).await;

        assert_eq!(
            sink.seen().last().unwrap(),
            &("state Faulted".to_string(), Some(SessionState::Faulted))
        );
    }

    /// Sink whose record callback takes a while to return
    #[derive(Default)]
    struct SlowSink {
        entered: AtomicBool,
        events: Mutex<Vec<String>>,
    }

    impl EventSink for SlowSink {
        fn on_record(&self, record: InboundRecord) {
            self.entered.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            self.events.lock().unwrap().push(format!("rx {}", record.text()));
        }

        fn on_state_change(&self, state: SessionState, _reason: Option<String>) {
            self.events.lock().unwrap().push(format!("state {}", state));
        }

        fn on_sent(&self, _record: OutboundRecord) {}
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_block_accessors_and_close_waits_for_it() {
        let transport = Arc::new(MockTransport::new());
        let device = transport.add_device(DEVICE);
        let sink = Arc::new(SlowSink::default());
        let session = SerialSession::new(transport, sink.clone(), test_options());

        session
            .open(DeviceId::from(DEVICE), PortConfig::default())
            .await
            .unwrap();
        device.push(b"slow");
        wait_until(|| sink.entered.load(Ordering::SeqCst)).await;

        let started = Instant::now();
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.device(), Some(DeviceId::from(DEVICE)));
        assert!(started.elapsed() < Duration::from_millis(100));

        session.close().await;
        assert!(!device.is_open());
        {
            let events = sink.events.lock().unwrap();
            assert_eq!(
                *events,
                vec!["state Open".to_string(), "rx slow".to_string(), "state Closed".to_string()]
            );
        }

        device.push(b"late");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.events.lock().unwrap().len(), 3);
    }
}
