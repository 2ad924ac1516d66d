/// What happened to one dispatched event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub event_type: String,
    /// Broker message id; `None` for in-process dispatch
    pub message_id: Option<String>,
    /// Handler instances invoked (including faulted ones)
    pub invoked: usize,
    /// Names of handler types whose instance faulted, once per faulted instance
    pub faulted: Vec<String>,
    /// Names of registered handler types that resolved no instance
    pub unresolved: Vec<String>,
}

impl DispatchReport {
    pub(crate) fn new(event_type: &str, message_id: Option<&str>) -> Self {
        Self {
            event_type: event_type.to_string(),
            message_id: message_id.map(str::to_string),
            ..Self::default()
        }
    }

    /// Instances that ran to completion without a fault.
    pub fn succeeded(&self) -> usize {
        self.invoked - self.faulted.len()
    }

    pub fn has_faults(&self) -> bool {
        !self.faulted.is_empty()
    }
}
