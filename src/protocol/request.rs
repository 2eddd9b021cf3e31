/// Which strict schema the request declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrictOutputKind {
    /// A strict structured-output (response) schema.
    ResponseSchema,
    /// A strict tool/function schema.
    Tool,
}

/// A strict schema the model's streamed text must conform to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrictOutput {
    pub kind: StrictOutputKind,
    /// Declared function name; used to name the synthesized tool call.
    pub function_name: String,
}

/// Per-request flags a decoder needs. Everything else about the request
/// stays with the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub tools_requested: bool,
    pub include_usage: bool,
    pub strict_output: Option<StrictOutput>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tools(mut self, tools_requested: bool) -> Self {
        self.tools_requested = tools_requested;
        self
    }

    #[must_use]
    pub fn with_usage(mut self, include_usage: bool) -> Self {
        self.include_usage = include_usage;
        self
    }

    #[must_use]
    pub fn with_strict_schema(mut self, function_name: impl Into<String>) -> Self {
        self.strict_output = Some(StrictOutput {
            kind: StrictOutputKind::ResponseSchema,
            function_name: function_name.into(),
        });
        self
    }

    /// Declares a strict tool schema; implies `tools_requested`.
    #[must_use]
    pub fn with_strict_tool(mut self, function_name: impl Into<String>) -> Self {
        self.tools_requested = true;
        self.strict_output = Some(StrictOutput {
            kind: StrictOutputKind::Tool,
            function_name: function_name.into(),
        });
        self
    }

    /// Whether streamed text is fragments of one JSON document that is only
    /// valid once complete, so per-chunk yields must be suppressed.
    #[must_use]
    pub fn buffers_structured_output(&self) -> bool {
        match &self.strict_output {
            Some(StrictOutput {
                kind: StrictOutputKind::ResponseSchema,
                ..
            }) => true,
            Some(StrictOutput {
                kind: StrictOutputKind::Tool,
                ..
            }) => self.tools_requested,
            None => false,
        }
    }

    #[must_use]
    pub fn strict_function_name(&self) -> Option<&str> {
        self.strict_output
            .as_ref()
            .map(|strict| strict.function_name.as_str())
    }
}
