//! The transparent proxy (component G): turns a typed method call into a `RequestMessage` and
//! unwraps the `ResponseMessage` back into a return value or a client error. [`ServiceProxy`] is
//! the hand-written client the design notes call for; [`define_service!`] is the macro sugar a
//! caller wraps around it per service interface, standing in for the reflection-based proxy
//! generation the full runtime this core sits inside performs against an opaque `ServiceInvoker`.

use wire::{ActivityId, Endpoint, RequestMessage, Value};

use crate::dispatcher::Runtime;
use crate::error::ClientError;

pub struct ServiceProxy<'a> {
    runtime: &'a Runtime,
    destination: Endpoint,
    service_name: &'static str,
}

impl<'a> ServiceProxy<'a> {
    pub fn new(runtime: &'a Runtime, destination: Endpoint, service_name: &'static str) -> ServiceProxy<'a> {
        ServiceProxy { runtime, destination, service_name }
    }

    /// Marshals `method_name(params)` into a `RequestMessage`, sends it, and unwraps the
    /// response into `R` or a [`ClientError`] carrying the remote rendering verbatim.
    pub async fn call<R>(&self, method_name: &str, params: Vec<Value>) -> Result<R, ClientError>
    where
        R: TryFrom<Value>,
        R::Error: std::fmt::Display,
    {
        let request = RequestMessage::new(ActivityId::new(), self.destination.clone(), self.service_name, method_name, params);
        let response = self.runtime.send(request).await?;
        let value = response.into_result()?;
        R::try_from(value).map_err(|err| {
            wire::RemoteError::new(err.to_string(), format!("{}.{}", self.service_name, method_name)).into()
        })
    }
}

/// Generates a typed client struct for a service interface:
///
/// ```ignore
/// define_service! {
///     pub trait IEchoService {
///         async fn say_hello(&self, name: String) -> String;
///         async fn crash(&self) -> ();
///     }
/// }
/// let client = IEchoService::new(&runtime, endpoint);
/// let greeting = client.say_hello("Paul".to_string()).await?;
/// ```
///
/// Each generated method builds a `RequestMessage` with `ServiceName` set to the trait's name and
/// `MethodName` to the method's name, sends it through the [`Runtime`] it was constructed with,
/// and unwraps the response.
#[macro_export]
macro_rules! define_service {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident {
            $(
                async fn $method:ident(&self $(, $arg:ident : $arg_ty:ty)* $(,)?) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis struct $name<'a> {
            proxy: $crate::proxy::ServiceProxy<'a>,
        }

        impl<'a> $name<'a> {
            pub fn new(runtime: &'a $crate::Runtime, destination: wire::Endpoint) -> Self {
                $name { proxy: $crate::proxy::ServiceProxy::new(runtime, destination, stringify!($name)) }
            }

            $(
                pub async fn $method(&self, $($arg: $arg_ty),*) -> Result<$ret, $crate::ClientError> {
                    #[allow(unused_mut)]
                    let mut params = Vec::new();
                    $(params.push(wire::Value::from($arg));)*
                    self.proxy.call(stringify!($method), params).await
                }
            )*
        }
    };
}
