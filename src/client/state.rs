//! Client socket phase and side flags.
//!
//! The phase is one mutually exclusive step of a transaction. Flags are
//! independent of it. Transition legality is checked by `can_enter_from`
//! so a broken transition surfaces as `InvalidState` instead of corrupting
//! the socket.

/// Step a client connection is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Inactive,
    Connecting,
    TransactionBegin,
    FormattingHeaders,
    FormattingBody,
    FlushingBody,
    ParsingHeaders,
    ParsingBody,
    TransactionEnd,
}

impl ClientPhase {
    /// Phases that consume bytes from the peer.
    pub fn is_recv(self) -> bool {
        matches!(self, ClientPhase::ParsingHeaders | ClientPhase::ParsingBody)
    }

    /// Phases that produce bytes for the peer.
    pub fn is_send(self) -> bool {
        matches!(
            self,
            ClientPhase::FormattingHeaders | ClientPhase::FormattingBody | ClientPhase::FlushingBody
        )
    }

    /// Allowed predecessors of `self`.
    pub fn can_enter_from(self, from: ClientPhase) -> bool {
        use ClientPhase::*;
        match self {
            TransactionBegin => matches!(from, Connecting | Inactive | TransactionEnd),
            FormattingHeaders => from == TransactionBegin,
            FormattingBody => from == FormattingHeaders,
            FlushingBody => from == FormattingBody,
            ParsingHeaders => from == FlushingBody,
            ParsingBody => from == ParsingHeaders,
            TransactionEnd => matches!(from, ParsingHeaders | ParsingBody),
            Connecting => from == Inactive,
            Inactive => true,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ClientPhase::Inactive => "inactive",
            ClientPhase::Connecting => "connecting",
            ClientPhase::TransactionBegin => "begun",
            ClientPhase::FormattingHeaders => "send-headers",
            ClientPhase::FormattingBody => "send-body",
            ClientPhase::FlushingBody => "flush-body",
            ClientPhase::ParsingHeaders => "recv-headers",
            ClientPhase::ParsingBody => "recv-body",
            ClientPhase::TransactionEnd => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientFlags {
    pub recv_paused: bool,
    pub send_paused: bool,
    pub aborted: bool,
    /// Set when a pooled connection is handed a new transaction; cleared
    /// once bytes move in either direction.
    pub first_use_after_reuse: bool,
    /// The transport failed before the reused connection moved any bytes,
    /// so the transaction goes to a fresh connection on removal.
    pub retry_stale: bool,
    /// The connection must not go back to the idle pool.
    pub dead: bool,
    pub last_chunk_received: bool,
}

impl ClientFlags {
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

    /// Only a transport failure on an untouched reused connection is retried.
    pub fn note_transport_failure(&mut self) {
        if self.first_use_after_reuse {
            self.first_use_after_reuse = false;
            self.retry_stale = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_transaction_order() {
        use ClientPhase::*;
        let order = [
            Connecting,
            TransactionBegin,
            FormattingHeaders,
            FormattingBody,
            FlushingBody,
            ParsingHeaders,
            ParsingBody,
            TransactionEnd,
        ];
        for pair in order.windows(2) {
            assert!(pair[1].can_enter_from(pair[0]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(TransactionBegin.can_enter_from(TransactionEnd));
        assert!(TransactionEnd.can_enter_from(ParsingHeaders));
        assert!(!FormattingBody.can_enter_from(TransactionBegin));
        assert!(!ParsingHeaders.can_enter_from(FormattingHeaders));
    }

    #[test]
    fn flag_descriptions() {
        let mut flags = ClientFlags::default();
        assert_eq!(flags.describe(), "active");
        flags.recv_paused = true;
        assert_eq!(flags.describe(), "recv-paused");
        flags.send_paused = true;
        assert_eq!(flags.describe(), "send-recv-paused");
        flags.aborted = true;
        assert_eq!(flags.describe(), "aborted");
    }

    #[test]
    fn only_untouched_reused_connections_are_retried() {
        let mut flags = ClientFlags::default();
        flags.note_transport_failure();
        assert!(!flags.retry_stale);

        flags.first_use_after_reuse = true;
        flags.note_transport_failure();
        assert!(flags.retry_stale);
        assert!(!flags.first_use_after_reuse);
    }
}
