/// Declares an RPC service.
///
/// ```ignore
/// service! {
///     service kv {
///         rpc get(GetArgs) returns (GetReply);
///     }
/// }
/// ```
///
/// expands to a module `kv` holding an async `Service` trait to implement on
/// the server side, a typed `Client` whose methods issue the calls, and an
/// `add_service` function registering an implementation on a `ServerBuilder`.
/// Method `m` of service `s` travels on the wire as `"s.m"`.
#[macro_export]
macro_rules! service {
    () => {
        compile_error!("a service needs a name and at least one rpc");
    };
    (
        $(#[$service_attr:meta])*
        service $svc_name:ident {
            $(
                $(#[$method_attr:meta])*
                rpc $method_name:ident($input:ty) returns ($output:ty);
            )*
        }
    ) => {
        $(#[$service_attr])*
        pub mod $svc_name {
            // Request and reply types live in the enclosing module.
            use super::*;

            extern crate futures as __futures;

            #[async_trait::async_trait]
            pub trait Service: Clone + Send + Sync + 'static {
                $(
                    $(#[$method_attr])*
                    async fn $method_name(&self, req: $input) -> $crate::Result<$output>;
                )*
            }

            #[derive(Clone)]
            pub struct Client {
                client: $crate::Client,
            }

            impl Client {
                pub fn new(client: $crate::Client) -> Client {
                    Client { client }
                }

                /// Name of the underlying network endpoint.
                pub fn name(&self) -> &str {
                    self.client.name()
                }

                /// Runs a future on the endpoint's worker pool.
                pub fn spawn<F>(&self, f: F)
                where
                    F: __futures::Future<Output = ()> + Send + 'static,
                {
                    self.client.worker.spawn_ok(f);
                }

                $(
                    pub fn $method_name(
                        &self,
                        args: &$input,
                    ) -> $crate::RpcFuture<$crate::Result<$output>> {
                        let fq_name = concat!(stringify!($svc_name), ".", stringify!($method_name));
                        self.client.call(fq_name, args)
                    }
                )*
            }

            pub fn add_service<T: Service>(
                svc: T,
                builder: &mut $crate::ServerBuilder,
            ) -> $crate::Result<()> {
                struct Factory<S> {
                    svc: S,
                }

                impl<S: Service> $crate::HandlerFactory for Factory<S> {
                    fn handler(&self, method: &'static str) -> Box<$crate::Handler> {
                        let svc = self.svc.clone();
                        Box::new(move |req| match method {
                            $(
                                stringify!($method_name) => {
                                    let args = match $crate::codec::decode(req) {
                                        Ok(args) => args,
                                        Err(e) => {
                                            return Box::pin(__futures::future::err(
                                                $crate::Error::Decode(e),
                                            ));
                                        }
                                    };
                                    Box::pin(async move {
                                        match svc.$method_name(args).await {
                                            Ok(reply) => {
                                                let mut buf = vec![];
                                                $crate::codec::encode(&reply, &mut buf)
                                                    .map_err($crate::Error::Encode)?;
                                                Ok(buf)
                                            }
                                            Err(e) => Err(e),
                                        }
                                    })
                                }
                            )*
                            other => Box::pin(__futures::future::err($crate::Error::Unimplemented(
                                format!("{} has no method {}", stringify!($svc_name), other),
                            ))),
                        })
                    }
                }

                builder.add_service(stringify!($svc_name), Box::new(Factory { svc }))
            }
        }
    };
}
