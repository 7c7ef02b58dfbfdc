use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the production, QC, packing and dispatch services.
///
/// Emission is observability only: a full channel or a dropped receiver must
/// never fail or block the business operation that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    ProductionRecordCreated {
        record_id: Uuid,
        line_id: Uuid,
    },
    ProductionStarted {
        record_id: Uuid,
        line_id: Uuid,
    },
    ProductionPaused {
        record_id: Uuid,
        line_id: Uuid,
        reason: Option<String>,
    },
    ProductionResumed {
        record_id: Uuid,
        line_id: Uuid,
    },
    ProductionStopped {
        record_id: Uuid,
        line_id: Uuid,
    },
    ProductionReviewed {
        record_id: Uuid,
        line_id: Uuid,
        approved: bool,
    },
    QuantityUpdated {
        record_id: Uuid,
        line_id: Uuid,
        delta: i32,
        achieved: i32,
    },
    QcRecorded {
        line_id: Uuid,
        qc_check_id: i64,
        rejected_delta: i32,
        recycled_delta: i32,
    },
    BundlesPacked {
        line_id: Uuid,
        bundle_ids: Vec<i64>,
        quantity: i32,
    },
    DispatchCreated {
        dispatch_id: Uuid,
        work_order_id: Uuid,
        total_quantity: i32,
    },
    DispatchDelivered {
        dispatch_id: Uuid,
    },
    LineClosed {
        line_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, reporting failure to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging on failure instead of surfacing it. This is
    /// what the services call after commit: the audit sink is best-effort.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event emission failed; continuing");
        }
    }
}

/// Drains the event channel, logging each event. Runs for the lifetime of
/// the process; downstream integrations (webhooks, reporting) hang off this
/// loop in the surrounding system.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::DispatchCreated {
                dispatch_id,
                work_order_id,
                total_quantity,
            } => {
                info!(
                    dispatch_id = %dispatch_id,
                    work_order_id = %work_order_id,
                    total_quantity,
                    "dispatch created"
                );
            }
            Event::LineClosed { line_id } => {
                info!(line_id = %line_id, "production line fully dispatched and closed");
            }
            other => {
                info!(event = ?other, "event");
            }
        }
    }

    info!("Event channel closed; processing loop exiting");
}
