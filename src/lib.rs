//! humansig - Passive behavioral humanness verification.
//!
//! This library scores whether an interaction stream came from a human by
//! watching how input arrives, never what it contains, and turns successful
//! verifications into portable tokens that agents can act under.
//!
//! # Privacy Guarantees
//!
//! - **No key content**: We never see which keys are pressed, only timing
//! - **No text**: Pointer paths and scroll positions carry no page content
//! - **Bounded retention**: Raw samples live in small fixed-size rings
//! - **Auditable**: Every token and delegation transition is logged
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          humansig                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌────────────┐   ┌───────────────────┐     │
//! │  │  Buffers  │──▶│ Estimators │──▶│  Analysis Engine  │     │
//! │  │ (rings)   │   │ (per chan) │   │ (EMA + coherence) │     │
//! │  └───────────┘   └────────────┘   └───────────────────┘     │
//! │                                            │                 │
//! │                                            ▼                 │
//! │  ┌───────────┐   ┌────────────┐   ┌───────────────────┐     │
//! │  │   Audit   │◀──│   Store    │◀──│  Sessions/Tokens  │     │
//! │  │   Trail   │   │ (in-mem)   │   │   /Delegations    │     │
//! │  └───────────┘   └────────────┘   └───────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use humansig::signal::{AnalysisEngine, SampleEvent, KeystrokeSample};
//!
//! let mut engine = AnalysisEngine::new();
//! engine.push(SampleEvent::Keystroke(KeystrokeSample { t: 100.0 }));
//! let snapshot = engine.tick(100.0);
//! assert!(snapshot.overall_score >= 0.0);
//! ```

pub mod config;
pub mod server;
pub mod signal;
pub mod store;

// Re-export key types at crate root for convenience
pub use config::Config;
pub use signal::{AnalysisEngine, AnalysisPhase, AnalysisSnapshot, ChannelScores, SampleEvent};
pub use store::{
    Delegation, DelegationDecision, DelegationScope, HumanToken, Session, Store, TokenVerification,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
