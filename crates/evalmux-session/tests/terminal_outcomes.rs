//! Every submission reaches exactly one terminal outcome, whatever the
//! engine does in between, once the session is closed.

use evalmux_session::{
    CallFlag, Contexts, EngineCallbacks, PendingRequest, PendingResponse, PromptReply,
    SessionCoordinator, SessionError, SessionHandle, SubmitOptions,
};
use futures::FutureExt;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Submit { visible: bool, bound: bool },
    Cancel(usize),
    Prompt(i8),
    Output,
    Error,
    Poll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<bool>(), any::<bool>()).prop_map(|(visible, bound)| Op::Submit { visible, bound }),
        1 => (0usize..16).prop_map(Op::Cancel),
        3 => (-1i8..=1).prop_map(Op::Prompt),
        2 => Just(Op::Output),
        1 => Just(Op::Error),
        3 => Just(Op::Poll),
    ]
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Completed,
    Failed(&'static str),
}

enum Slot {
    Waiting(PendingRequest),
    Sent(PendingResponse),
    Done(Outcome),
}

struct Harness {
    handle: SessionHandle,
    engine: EngineCallbacks,
    frames: Contexts,
    reply: Option<PromptReply>,
    slots: Vec<Slot>,
}

impl Harness {
    fn new() -> Self {
        let (handle, engine) = SessionCoordinator::default().split();
        Self {
            handle,
            engine,
            frames: Contexts::toplevel(),
            reply: None,
            slots: Vec::new(),
        }
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::Submit { visible, bound } => {
                let mut options = SubmitOptions { visible, context_bound: true };
                if !bound {
                    options = options.unbound();
                }
                self.slots.push(Slot::Waiting(self.handle.submit(options)));
            }
            Op::Cancel(i) => {
                if let Some(Slot::Waiting(pending)) = self.slots.get_mut(i) {
                    let _ = pending.cancel();
                }
            }
            Op::Prompt(delta) => {
                self.frames = match delta {
                    1 if self.frames.depth() < 4 => self.frames.nested(CallFlag::Browser),
                    -1 if self.frames.depth() > 1 => {
                        Contexts::new(self.frames.as_slice()[1..].to_vec())
                    }
                    _ => self.frames.clone(),
                };
                self.reply = Some(self.engine.on_prompt(self.frames.clone(), "> ", 64, true));
            }
            Op::Output => self.engine.on_output(&self.frames, "out\n", false),
            Op::Error => {
                let raised_at = self.frames.nested(CallFlag::Builtin);
                self.engine.on_output(&raised_at, "Error: e\n", true);
            }
            Op::Poll => self.poll(),
        }
    }

    fn poll(&mut self) {
        if let Some(reply) = self.reply.as_mut() {
            if reply.now_or_never().is_some() {
                self.reply = None;
            }
        }
        for slot in &mut self.slots {
            let next = match slot {
                Slot::Waiting(pending) => match pending.now_or_never() {
                    None => continue,
                    Some(Ok(request)) => Slot::Sent(request.send("x")),
                    Some(Err(err)) => Slot::Done(Outcome::Failed(err.error_kind())),
                },
                Slot::Sent(response) => match response.now_or_never() {
                    None => continue,
                    Some(Ok(_)) => Slot::Done(Outcome::Completed),
                    Some(Err(err)) => Slot::Done(Outcome::Failed(err.error_kind())),
                },
                Slot::Done(_) => continue,
            };
            *slot = next;
        }
    }
}

proptest! {
    #[test]
    fn every_submission_terminates_once(ops in proptest::collection::vec(op(), 0..64)) {
        let mut harness = Harness::new();
        for op in ops {
            harness.apply(op);
        }
        harness.engine.close();
        // Requests matched just before close still need one send to settle.
        harness.poll();
        harness.poll();

        for slot in &harness.slots {
            match slot {
                Slot::Done(Outcome::Completed) => {}
                // A prompt superseded before the client answered reports abandoned.
                Slot::Done(Outcome::Failed(kind)) => {
                    prop_assert!(
                        matches!(*kind, "engine_error" | "cancelled" | "closed" | "abandoned"),
                        "unexpected failure kind {}",
                        kind
                    );
                }
                _ => {
                    prop_assert!(false, "submission left without an outcome");
                }
            }
        }
        prop_assert!(harness.handle.is_closed());
        prop_assert_eq!(harness.handle.pending_count(), 0);
        prop_assert!(matches!(
            harness.handle.submit(SubmitOptions::default()).now_or_never(),
            Some(Err(SessionError::Closed))
        ));
    }
}
