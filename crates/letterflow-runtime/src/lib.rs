//! # letterflow-runtime
//!
//! Async runtime for metered letter generation.
//!
//! Built on the deterministic rules in `letterflow-core`, this crate owns
//! everything that touches the outside world:
//! - The allowance ledger, over a store with an atomic decrement-if-positive
//! - A windowed circuit breaker and a retrying client for the generation
//!   service
//! - The orchestrator that ties credit, letter status and generation
//!   together so a spent credit always ends in content or a refund
//! - The review workflow for owner and reviewer actions
//!
//! ## Example
//!
//! ```rust,ignore
//! use letterflow_runtime::{GenerationOrchestrator, InMemoryStore, RuntimeConfig};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let orchestrator = GenerationOrchestrator::builder()
//!     .provider(provider)
//!     .memory_store(store)
//!     .config(RuntimeConfig::from_file("letterflow.yaml")?)
//!     .build()?;
//!
//! let outcome = orchestrator.generate_letter(&owner, &letter_id, &params).await?;
//! ```

pub mod audit;
pub mod config;
pub mod ledger;
pub mod letters;
pub mod memory;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod workflow;

pub use audit::{AuditError, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::{ConfigError, ProviderConfig, RuntimeConfig};
pub use ledger::{AllowanceLedger, AllowanceStore, LedgerError};
pub use letters::{LetterContent, LetterStore, StoreError};
pub use memory::InMemoryStore;
pub use orchestrator::{
    GenerationError, GenerationOrchestrator, GenerationOrchestratorBuilder, GenerationOutcome,
    RecoveryReport,
};
pub use providers::{
    CompletionConfig, GeneratedText, GenerationRequest, LlmProvider, ProviderError,
    ProviderRegistry, TokenUsage,
};
pub use resilience::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, HealthReport,
    ResilienceError, ResilientClient,
};
pub use workflow::{LetterWorkflow, WorkflowError};
