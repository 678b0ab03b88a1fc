//! Content pipeline: acquire source text, then rewrite it
//!
//! Each stage sits behind a trait ([`ContentSource`], [`RewriteService`]) so
//! the orchestrator can be driven by scripted stages in tests. The stage
//! wrappers own the failure policy:
//!
//! - [`Acquirer`] falls back to the last text it fetched for the same source
//!   and fails only when there is nothing to fall back to.
//! - [`Transformer`] never fails; a rewrite error degrades to the input text.

pub mod mock;
pub mod rewrite;
pub mod source;

pub use mock::{MockRewriter, MockSource};
pub use rewrite::{GeminiRewriter, PassthroughRewriter, RewriteService, Transformed, Transformer};
pub use source::{Acquired, Acquirer, ContentSource, SourceFetcher, SourceSpec};
