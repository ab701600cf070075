/// One version of the control protocol spoken over an RPC connection.
pub trait Protocol {
    /// Answers one text frame; `None` means nothing is sent back.
    async fn process_text(&self, raw: &str) -> Option<String>;

    async fn process_binary(&self, raw: &[u8]) -> Option<String>;
}
