use serde::{Deserialize, Serialize};

use crate::bbox::Bbox;
use crate::line_counter::Counts;

/// What was seen in a single processed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Index of the frame in the source stream.
    pub frame_number: u64,
    pub timestamp_ms: u64,
    /// People visible in this frame.
    pub people: usize,
    pub bboxes: Vec<Bbox>,
    /// Running entry/exit totals, only set when counting crossings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<Counts>,
}
