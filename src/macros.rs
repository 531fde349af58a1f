/// Per-verb shorthands on a [`Route`](crate::router::Route).
macro_rules! route_verbs {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Appends a handler for `", stringify!($method), "` requests.")]
            pub fn $name<F, R>(&mut self, handler: F) -> &mut Self
            where
                F: Fn($crate::context::Context) -> R + Send + Sync + 'static,
                R: $crate::handler::IntoHandlerFuture,
            {
                self.method($crate::http::Method::$method, handler)
            }
        )*
    };
}

/// Per-verb shorthands for anything exposing `route(path) -> &mut Route`.
macro_rules! path_verbs {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Registers a `", stringify!($method), "` handler for `path`.")]
            pub fn $name<F, R>(&mut self, path: &str, handler: F) -> &mut Self
            where
                F: Fn($crate::context::Context) -> R + Send + Sync + 'static,
                R: $crate::handler::IntoHandlerFuture,
            {
                self.route(path).method($crate::http::Method::$method, handler);
                self
            }
        )*
    };
}
