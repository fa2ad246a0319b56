//! Single-slot rendezvous between a prompt and the next submission.
//!
//! When the engine reaches a prompt and nothing queued matches it, it parks
//! a token here and waits on the token's reply. The next `submit` takes the
//! token instead of queueing and answers the engine directly.

use evalmux_core::Contexts;
use tokio::sync::oneshot;

use crate::request::PromptReply;

pub(crate) struct HandoffToken {
    pub(crate) contexts: Contexts,
    pub(crate) prompt: String,
    pub(crate) max_length: usize,
    pub(crate) reply: oneshot::Sender<String>,
}

impl HandoffToken {
    pub(crate) fn new(contexts: Contexts, prompt: &str, max_length: usize) -> (Self, PromptReply) {
        let (reply, rx) = oneshot::channel();
        let token = Self {
            contexts,
            prompt: prompt.to_string(),
            max_length,
            reply,
        };
        (token, PromptReply::waiting(rx))
    }
}

#[derive(Default)]
pub(crate) struct HandoffSlot {
    token: Option<HandoffToken>,
}

impl HandoffSlot {
    /// Park `token`, returning any token it displaced.
    pub(crate) fn install(&mut self, token: HandoffToken) -> Option<HandoffToken> {
        self.token.replace(token)
    }

    pub(crate) fn take(&mut self) -> Option<HandoffToken> {
        self.token.take()
    }

    pub(crate) fn is_occupied(&self) -> bool {
        self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalmux_core::SessionError;
    use futures::FutureExt;

    #[test]
    fn take_empties_slot() {
        let mut slot = HandoffSlot::default();
        let (token, _reply) = HandoffToken::new(Contexts::toplevel(), "> ", 10);
        assert!(slot.install(token).is_none());
        assert!(slot.is_occupied());

        let token = slot.take().unwrap();
        assert_eq!(token.prompt, "> ");
        assert!(!slot.is_occupied());
        assert!(slot.take().is_none());
    }

    #[test]
    fn token_reply_reaches_engine() {
        let (token, reply) = HandoffToken::new(Contexts::toplevel(), "> ", 10);
        token.reply.send("x <- 1".into()).unwrap();
        assert_eq!(reply.now_or_never().unwrap().unwrap(), "x <- 1");
    }

    #[test]
    fn displaced_token_abandons_its_prompt() {
        let mut slot = HandoffSlot::default();
        let (first, first_reply) = HandoffToken::new(Contexts::toplevel(), "> ", 10);
        let (second, _second_reply) = HandoffToken::new(Contexts::toplevel(), "> ", 10);
        slot.install(first);
        drop(slot.install(second));
        assert_eq!(first_reply.now_or_never().unwrap(), Err(SessionError::Abandoned));
    }
}
