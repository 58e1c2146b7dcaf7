use crate::tokenizer::RowSink;

/// A diagnostic captured from the interpreter's error stream.
///
/// Warnings chain in arrival order, earliest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    message: String,
    next: Option<Box<Warning>>,
}

impl Warning {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn next(&self) -> Option<&Warning> {
        self.next.as_deref()
    }

    /// This warning followed by the rest of its chain.
    pub fn iter(&self) -> WarningIter<'_> {
        WarningIter {
            current: Some(self),
        }
    }

    /// Chains messages in order, returning the head.
    pub fn chain(messages: Vec<String>) -> Option<Warning> {
        let mut head = None;
        for message in messages.into_iter().rev() {
            head = Some(Warning {
                message,
                next: head.map(Box::new),
            });
        }
        head
    }
}

pub struct WarningIter<'a> {
    current: Option<&'a Warning>,
}

impl<'a> Iterator for WarningIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let warning = self.current?;
        self.current = warning.next();
        Some(warning.message())
    }
}

/// Collects each captured line as one warning message.
#[derive(Debug, Default)]
pub struct WarningCollector {
    pending: String,
    messages: Vec<String>,
}

impl WarningCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Chains the collected messages. A final line that never saw its
    /// line break still counts.
    pub fn into_chain(mut self) -> Option<Warning> {
        if !self.pending.is_empty() {
            self.on_row();
        }
        Warning::chain(self.messages)
    }
}

impl RowSink for WarningCollector {
    fn on_cell(&mut self, value: String) {
        self.pending.push_str(&value);
    }

    fn on_row(&mut self) {
        self.messages.push(std::mem::take(&mut self.pending));
    }
}
