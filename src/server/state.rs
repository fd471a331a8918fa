//! Server socket phase and side flags.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Inactive,
    TransactionBegin,
    ParsingHeaders,
    ParsingBody,
    SkippingTrailer,
    FormattingHeaders,
    FormattingBody,
    FlushingBody,
    TransactionEnd,
}

impl ServerPhase {
    pub fn is_recv(self) -> bool {
        matches!(
            self,
            ServerPhase::ParsingHeaders | ServerPhase::ParsingBody | ServerPhase::SkippingTrailer
        )
    }

    pub fn is_send(self) -> bool {
        matches!(
            self,
            ServerPhase::FormattingHeaders | ServerPhase::FormattingBody | ServerPhase::FlushingBody
        )
    }

    /// Allowed predecessors of `self`. A response may start from any point
    /// of the request once the handler decides to answer early.
    pub fn can_enter_from(self, from: ServerPhase) -> bool {
        use ServerPhase::*;
        match self {
            TransactionBegin => matches!(from, Inactive | TransactionEnd),
            ParsingHeaders => from == TransactionBegin,
            ParsingBody => from == ParsingHeaders,
            SkippingTrailer => from == ParsingBody,
            FormattingHeaders => matches!(from, TransactionBegin | ParsingHeaders | ParsingBody | SkippingTrailer),
            FormattingBody => from == FormattingHeaders,
            FlushingBody => from == FormattingBody,
            TransactionEnd => from == FlushingBody,
            Inactive => true,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ServerPhase::Inactive => "inactive",
            ServerPhase::TransactionBegin => "begun",
            ServerPhase::ParsingHeaders => "recv-headers",
            ServerPhase::ParsingBody => "recv-body",
            ServerPhase::SkippingTrailer => "skip-trailer",
            ServerPhase::FormattingHeaders => "send-headers",
            ServerPhase::FormattingBody => "send-body",
            ServerPhase::FlushingBody => "flush-body",
            ServerPhase::TransactionEnd => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerFlags {
    pub recv_paused: bool,
    pub send_paused: bool,
    pub aborted: bool,
    /// Set until the whole request, trailer included, has been read.
    pub cannot_reuse: bool,
    pub last_chunk_received: bool,
    pub dead: bool,
}

impl ServerFlags {
    pub fn describe(&self) -> &'static str {
        if self.aborted {
            return "aborted";
        }
        match (self.send_paused, self.recv_paused) {
            (true, true) => "send-recv-paused",
            (false, true) => "recv-paused",
            (true, false) => "send-paused",
            (false, false) => "active",
        }
    }
}
