//! Stream-level tests for the CM160 frame engine.
//!
//! These feed whole byte streams through [`FrameEngine`] the way a device
//! session does and check the framing, checksum and handshake behaviour.

use cm160_protocol::*;
use proptest::prelude::*;

fn live(amps_lo: u8, amps_hi: u8) -> [u8; FRAME_LEN] {
    seal_frame([FRAME_ID_LIVE, 25, 1, 20, 7, 15, 0x64, 0x00, amps_lo, amps_hi])
}

fn history(month: u8) -> [u8; FRAME_LEN] {
    seal_frame([FRAME_ID_HISTORY, 25, month, 19, 23, 59, 0x00, 0x00, 0x20, 0x01])
}

fn readings(events: &[EngineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::Reading(_)))
        .count()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_every_step_consumes_bytes(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut engine = FrameEngine::new();
        engine.feed(&data).unwrap();

        let mut before = engine.buffer().buffered_len();
        while let Some(event) = engine.next_event() {
            if matches!(event, EngineEvent::Stuck { .. }) {
                break;
            }
            let after = engine.buffer().buffered_len();
            prop_assert!(after < before, "no progress: {} -> {}", before, after);
            before = after;
        }
        prop_assert!(engine.buffer().buffered_len() < FRAME_LEN || engine.handshake().is_stuck());
    }

    #[test]
    fn prop_checksum_decides_decoding(tail in any::<[u8; 9]>(), sum in any::<u8>()) {
        let mut window = [0u8; FRAME_LEN];
        window[0] = FRAME_ID_LIVE;
        window[1..CHECKSUM_LEN].copy_from_slice(&tail);
        window[CHECKSUM_LEN] = sum;

        let valid = checksum(&window[..CHECKSUM_LEN]) == sum;
        prop_assert_eq!(decode_frame(&window).is_ok(), valid);
    }

    #[test]
    fn prop_live_frame_survives_leading_garbage(
        garbage in proptest::collection::vec(0u8..0x50, 0..40),
        lo in any::<u8>(),
        hi in any::<u8>(),
    ) {
        let mut engine = FrameEngine::new();
        engine.feed(&garbage).unwrap();
        engine.feed(&live(lo, hi)).unwrap();

        let events: Vec<_> = engine.events().collect();
        prop_assert_eq!(readings(&events), 1);
        let Some(EngineEvent::Reading(frame)) = events.last() else {
            return Err(TestCaseError::fail("last event should be the reading"));
        };
        prop_assert_eq!(frame.amps_raw, u16::from_le_bytes([lo, hi]));
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_eight_id_frames_are_stuck_seven_are_not() {
    let mut engine = FrameEngine::new();
    for _ in 0..7 {
        engine.feed(&ID_FRAME).unwrap();
    }
    let events: Vec<_> = engine.events().collect();
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::Stuck { .. })));

    engine.feed(&ID_FRAME).unwrap();
    let events: Vec<_> = engine.events().collect();
    assert_eq!(
        events,
        vec![EngineEvent::Reply(ID_REPLY), EngineEvent::Stuck { id_count: 8 }]
    );
}

#[test]
fn test_data_frame_between_id_frames_prevents_stuck() {
    let mut engine = FrameEngine::new();
    for _ in 0..4 {
        engine.feed(&ID_FRAME).unwrap();
    }
    engine.feed(&live(1, 0)).unwrap();
    for _ in 0..7 {
        engine.feed(&ID_FRAME).unwrap();
    }

    let events: Vec<_> = engine.events().collect();
    assert!(!engine.handshake().is_stuck());
    assert_eq!(engine.handshake().id_count(), 7);
    assert_eq!(readings(&events), 1);
}

#[test]
fn test_stale_history_published_only_after_handshake() {
    let mut engine = FrameEngine::new();
    engine.feed(&history(0x01)).unwrap();
    let events: Vec<_> = engine.events().collect();
    assert!(matches!(events[..], [EngineEvent::Suppressed(_)]));

    engine.feed(&ID_FRAME).unwrap();
    engine.feed(&WAIT_FRAME).unwrap();
    engine.feed(&history(0x01)).unwrap();
    let events: Vec<_> = engine.events().collect();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[2], EngineEvent::Reading(f) if f.kind == DataKind::History));
}

#[test]
fn test_corrupt_live_frame_resyncs_one_byte() {
    let mut corrupt = live(0x10, 0x00);
    corrupt[10] ^= 0xFF;

    let mut engine = FrameEngine::new();
    engine.feed(&corrupt).unwrap();
    engine.feed(&live(0x20, 0x00)).unwrap();

    let events: Vec<_> = engine.events().collect();
    let first_skip = match &events[0] {
        EngineEvent::Discarded { skipped, error, .. } => {
            assert_eq!(error.reason(), "checksum");
            *skipped
        }
        other => panic!("expected discard, got {:?}", other),
    };
    assert_eq!(first_skip, 1);
    assert_eq!(readings(&events), 1);
    assert!(matches!(events.last(), Some(EngineEvent::Reading(f)) if f.amps_raw == 0x20));
}

#[test]
fn test_split_reads_reassemble() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&ID_FRAME);
    stream.extend_from_slice(&WAIT_FRAME);
    stream.extend_from_slice(&live(0x09, 0x44));

    let mut engine = FrameEngine::new();
    let mut events = Vec::new();
    for chunk in stream.chunks(4) {
        engine.feed(chunk).unwrap();
        events.extend(engine.events());
    }

    assert_eq!(
        &events[..2],
        &[EngineEvent::Reply(ID_REPLY), EngineEvent::Reply(WAIT_REPLY)]
    );
    let EngineEvent::Reading(frame) = events[2] else {
        panic!("expected reading, got {:?}", events[2]);
    };
    assert!((frame.amps() - 1219.19).abs() < 1e-9);
}
