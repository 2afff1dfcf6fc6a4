// Response classification
// Ordered list of classifiers deciding how a failed request is settled

use serde_json::Value;

/// Error code a 403 body carries when step-up verification is required
pub const STEP_UP_ERROR_CODE: &str = "CRUCIAL_AUTH_REQUIRED";

/// Header marking a request replayed after step-up verification
pub const STEP_UP_VERIFIED_HEADER: &str = "x-crucial-auth-verified";

pub const FALLBACK_MESSAGE: &str = "Something went wrong";
pub const TIMEOUT_MESSAGE: &str = "Request timeout";

/// Body fields checked for a human-readable message, highest priority first
const MESSAGE_FIELDS: [&str; 3] = ["error", "message", "msg"];

/// A request that did not succeed
#[derive(Debug, Clone)]
pub enum Failure {
    /// Server answered with a non-success status
    Status {
        status: u16,
        body: Option<Value>,
        /// Request already carried the step-up marker
        replayed: bool,
    },
    /// Client-side timeout, no response
    Timeout,
    /// No response at all
    Transport(String),
}

/// How the pipeline settles a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Unauthorized,
    StepUpRequired,
    StepUpExhausted,
    SessionReplaced,
    Message { status: u16, message: String },
    Timeout,
    Network(String),
}

type Classifier = fn(&Failure) -> Option<Verdict>;

/// Evaluated in order, first match wins
///
/// 401 must precede the 403 checks, and the step-up 403 must precede the
/// generic 403, otherwise a step-up response is taken for a replaced session.
pub const CLASSIFIERS: [(&str, Classifier); 6] = [
    ("unauthorized", unauthorized),
    ("step_up", step_up),
    ("session_replaced", session_replaced),
    ("response_message", response_message),
    ("timeout", timeout),
    ("network", network),
];

/// Classify a failure
pub fn classify(failure: &Failure) -> Verdict {
    for (name, classifier) in CLASSIFIERS {
        if let Some(verdict) = classifier(failure) {
            tracing::debug!(classifier = name, verdict = ?verdict, "Classified failed request");
            return verdict;
        }
    }

    // Every failure shape is covered above
    Verdict::Network(FALLBACK_MESSAGE.to_string())
}

fn unauthorized(failure: &Failure) -> Option<Verdict> {
    match failure {
        Failure::Status { status: 401, .. } => Some(Verdict::Unauthorized),
        _ => None,
    }
}

fn step_up(failure: &Failure) -> Option<Verdict> {
    match failure {
        Failure::Status {
            status: 403,
            body: Some(body),
            replayed,
        } if is_step_up_code(body) => Some(if *replayed {
            Verdict::StepUpExhausted
        } else {
            Verdict::StepUpRequired
        }),
        _ => None,
    }
}

fn session_replaced(failure: &Failure) -> Option<Verdict> {
    match failure {
        Failure::Status { status: 403, .. } => Some(Verdict::SessionReplaced),
        _ => None,
    }
}

fn response_message(failure: &Failure) -> Option<Verdict> {
    match failure {
        Failure::Status { status, body, .. } => Some(Verdict::Message {
            status: *status,
            message: body
                .as_ref()
                .and_then(extract_message)
                .unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
        }),
        _ => None,
    }
}

fn timeout(failure: &Failure) -> Option<Verdict> {
    match failure {
        Failure::Timeout => Some(Verdict::Timeout),
        _ => None,
    }
}

fn network(failure: &Failure) -> Option<Verdict> {
    match failure {
        Failure::Transport(message) if !message.is_empty() => {
            Some(Verdict::Network(message.clone()))
        }
        Failure::Transport(_) => Some(Verdict::Network(FALLBACK_MESSAGE.to_string())),
        _ => None,
    }
}

/// Step-up is signalled only by an exact error code match
fn is_step_up_code(body: &Value) -> bool {
    ["error", "code"]
        .iter()
        .any(|field| body.get(field).and_then(Value::as_str) == Some(STEP_UP_ERROR_CODE))
}

/// Pull a human-readable message out of an error body
pub fn extract_message(body: &Value) -> Option<String> {
    MESSAGE_FIELDS.iter().find_map(|field| match body.get(field)? {
        Value::String(message) if !message.trim().is_empty() => Some(message.clone()),
        // {"error": {"message": "..."}}
        Value::Object(nested) => nested
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    })
}
