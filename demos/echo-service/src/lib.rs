//! `IEchoService`: the demo service both ends of the end-to-end scenarios talk to. `SayHello`
//! exercises the ordinary request/response path; `Crash` exercises the remote-error rendering
//! path with a genuine handler panic (divide by zero) caught and turned into a `RemoteError`.

use std::panic::AssertUnwindSafe;
use std::sync::Once;

use async_trait::async_trait;
use support::Logger;
use wire::{RemoteError, RequestMessage, ResponseMessage, Value};

runtime::define_service! {
    pub trait IEchoService {
        async fn say_hello(&self, name: String) -> String;
        async fn crash(&self) -> ();
    }
}

static SILENCE_PANIC_HOOK: Once = Once::new();

/// Replaces the default panic hook with a no-op one. `Crash` deliberately panics on every call;
/// without this every invocation would spam the server's stderr with a backtrace.
fn silence_panic_hook() {
    SILENCE_PANIC_HOOK.call_once(|| {
        std::panic::set_hook(Box::new(|_| {}));
    });
}

pub struct EchoServiceInvoker {
    log: Logger,
}

impl EchoServiceInvoker {
    pub fn new(log: Logger) -> EchoServiceInvoker {
        silence_panic_hook();
        EchoServiceInvoker { log }
    }
}

#[async_trait]
impl exchange::RequestHandler for EchoServiceInvoker {
    async fn handle(&self, request: RequestMessage) -> ResponseMessage {
        support::debug!(self.log, "invoking"; "method" => request.method_name());

        match request.method_name() {
            "say_hello" => {
                let name = match request.params().first() {
                    Some(Value::Str(s)) => s.clone(),
                    _ => return ResponseMessage::failure(
                        request.request_id(),
                        RemoteError::new("say_hello expects a single string argument", "IEchoService.say_hello"),
                    ),
                };
                ResponseMessage::success(request.request_id(), Value::Str(format!("{name}...")))
            }
            "crash" => match std::panic::catch_unwind(AssertUnwindSafe(|| {
                let divisor = 0i64;
                #[allow(clippy::erasing_op)]
                let _ = 1i64 / divisor;
            })) {
                Ok(()) => ResponseMessage::success(request.request_id(), Value::Unit),
                Err(payload) => ResponseMessage::failure(
                    request.request_id(),
                    RemoteError::new(panic_message(&payload), "IEchoService.crash"),
                ),
            },
            other => ResponseMessage::failure(
                request.request_id(),
                RemoteError::new(format!("unknown method '{other}'"), "IEchoService"),
            ),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "the handler panicked".to_string()
    }
}
