//! The fixed set of hot phrases preloaded into the TTS cache.
//!
//! These are spoken on latency-critical paths (call start, silence
//! prompts, failure fallbacks), so they must come out of the cache
//! instantly rather than wait on the synthesis provider.

/// Canned phrases the pipeline plays without a model round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phrase {
    /// Call-opening greeting, including the mandatory notice that the
    /// call is handled by an automated system.
    Greeting,

    /// Spoken while a slow tool call is in flight.
    PleaseWait,

    /// Silence prompt after the listening timeout.
    StillThere,

    /// Spoken before a normal hangup.
    Farewell,

    /// Fallback when a provider fails mid-call.
    TechnicalIssue,

    /// Spoken when handing the caller to a human operator.
    Transfer,
}

impl Phrase {
    /// All hot phrases, in preload order.
    pub const ALL: [Self; 6] = [
        Self::Greeting,
        Self::PleaseWait,
        Self::StillThere,
        Self::Farewell,
        Self::TechnicalIssue,
        Self::Transfer,
    ];

    /// The spoken text of this phrase.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::Greeting => {
                "Good day! You have reached the tyre centre. \
                 Please note this call is handled by an automated assistant. \
                 How can I help you?"
            }
            Self::PleaseWait => "One moment please, I am checking that for you.",
            Self::StillThere => "Are you still there?",
            Self::Farewell => "Thank you for calling. Goodbye!",
            Self::TechnicalIssue => {
                "I am sorry, we are having a technical issue. \
                 Let me transfer you to an operator."
            }
            Self::Transfer => "Please hold while I transfer you to an operator.",
        }
    }
}
