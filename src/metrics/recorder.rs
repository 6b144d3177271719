//! Metrics recorder for channel slots and sender transfers
//!
//! Everything goes through the `metrics` facade; without an installed
//! recorder the calls are no-ops.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Channel
    describe_counter!("aloha_slots_total", "Slots run by the channel, by outcome");
    describe_counter!(
        "aloha_frames_broadcast_total",
        "Frames arbitrated cleanly and echoed to all stations"
    );
    describe_counter!(
        "aloha_bytes_broadcast_total",
        "Bytes of clean frames echoed (counted once per frame)"
    );
    describe_counter!(
        "aloha_collisions_total",
        "Station transmissions discarded due to contention"
    );
    describe_counter!(
        "aloha_stations_departed_total",
        "Stations removed after disconnect or send failure"
    );
    describe_histogram!(
        "aloha_broadcast_receivers",
        "Stations an echo was sent to"
    );
    describe_gauge!("aloha_attached_stations", "Currently attached stations");

    // Sender
    describe_counter!(
        "aloha_frames_delivered_total",
        "Frames acknowledged by the channel"
    );
    describe_counter!(
        "aloha_transmissions_total",
        "Frame transmissions including retries"
    );
    describe_counter!("aloha_retries_total", "Failed attempts followed by backoff");
    describe_histogram!("aloha_backoff_slots", "Backoff length in slots");
    describe_counter!(
        "aloha_transfers_completed_total",
        "Transfers that delivered the whole input"
    );
    describe_counter!(
        "aloha_transfers_failed_total",
        "Transfers aborted before the end of input"
    );
    describe_histogram!(
        "aloha_transfer_duration_seconds",
        "Wall-clock duration of finished transfers"
    );
}

// ============== Channel ==============

pub fn record_slot(outcome: &'static str) {
    counter!("aloha_slots_total", "outcome" => outcome).increment(1);
}

pub fn record_clean_broadcast(bytes: usize, receivers: usize) {
    counter!("aloha_frames_broadcast_total").increment(1);
    counter!("aloha_bytes_broadcast_total").increment(bytes as u64);
    histogram!("aloha_broadcast_receivers").record(receivers as f64);
}

pub fn record_collision(colliders: usize) {
    counter!("aloha_collisions_total").increment(colliders as u64);
}

pub fn record_station_departed() {
    counter!("aloha_stations_departed_total").increment(1);
}

pub fn set_attached_stations(count: usize) {
    gauge!("aloha_attached_stations").set(count as f64);
}

// ============== Sender ==============

pub fn record_frame_delivered(transmissions: u32) {
    counter!("aloha_frames_delivered_total").increment(1);
    counter!("aloha_transmissions_total").increment(transmissions as u64);
}

pub fn record_retry(backoff_slots: u64) {
    counter!("aloha_retries_total").increment(1);
    histogram!("aloha_backoff_slots").record(backoff_slots as f64);
}

pub fn record_transfer_complete(duration: Duration) {
    counter!("aloha_transfers_completed_total").increment(1);
    histogram!("aloha_transfer_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_transfer_failed(reason: &'static str) {
    counter!("aloha_transfers_failed_total", "reason" => reason).increment(1);
}
