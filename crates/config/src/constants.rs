//! Centralized constants
//!
//! Values shared between settings defaults and component configs so the two
//! never drift apart.

/// Retrieval constants
pub mod retrieval {
    /// RRF constant k in 1/(k + rank)
    pub const RRF_K: f32 = 60.0;

    /// Candidates carried from each ranking into fusion
    pub const OVER_RETRIEVE_K: usize = 20;

    /// Final result count after reranking
    pub const FINAL_TOP_K: usize = 5;

    /// BM25 term-frequency saturation
    pub const BM25_K1: f32 = 1.2;

    /// BM25 length normalization
    pub const BM25_B: f32 = 0.75;
}

/// Generation and streaming constants
pub mod generation {
    /// Max turns kept per session history
    pub const MAX_HISTORY_LENGTH: usize = 10;

    /// Seconds of stream inactivity before a keep-alive comment is sent
    pub const KEEPALIVE_IDLE_SECS: u64 = 15;

    /// Token channel capacity between generation worker and session task
    pub const TOKEN_CHANNEL_CAPACITY: usize = 100;
}
