use std::sync::Arc;

use async_trait::async_trait;
use http::Method;

use super::{DispatchError, RouteError, RouteTable, Router};
use crate::core::{handler::Chain, request::Request, response::Response};

/// Router whose routes carry their handler chains directly.
///
/// ```
/// use http::Method;
/// use switchyard::core::{
///     handler::{HandlerError, handler_fn},
///     router::EntryRouter,
/// };
///
/// let mut router = EntryRouter::new();
/// router
///     .get(
///         "/users/:id",
///         handler_fn(|req, res| {
///             Box::pin(async move {
///                 res.text(format!("user {}", req.param("id").unwrap_or_default()))?;
///                 Ok::<_, HandlerError>(())
///             })
///         }),
///     )
///     .unwrap()
///     .route(&[Method::PUT, Method::PATCH], "/users/:id", switchyard::core::handler::Chain::new())
///     .unwrap();
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Default)]
pub struct EntryRouter {
    table: RouteTable<Chain>,
}

impl EntryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `chain` for `methods` on `pattern`.
    pub fn route(
        &mut self,
        methods: &[Method],
        pattern: &str,
        chain: impl Into<Chain>,
    ) -> Result<&mut Self, RouteError> {
        self.table.insert(Some(methods), pattern, chain.into())?;
        Ok(self)
    }

    /// Register `chain` for every method.
    pub fn any(&mut self, pattern: &str, chain: impl Into<Chain>) -> Result<&mut Self, RouteError> {
        self.table.insert(None, pattern, chain.into())?;
        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, chain: impl Into<Chain>) -> Result<&mut Self, RouteError> {
        self.route(&[Method::GET], pattern, chain)
    }

    pub fn post(&mut self, pattern: &str, chain: impl Into<Chain>) -> Result<&mut Self, RouteError> {
        self.route(&[Method::POST], pattern, chain)
    }

    pub fn put(&mut self, pattern: &str, chain: impl Into<Chain>) -> Result<&mut Self, RouteError> {
        self.route(&[Method::PUT], pattern, chain)
    }

    pub fn patch(&mut self, pattern: &str, chain: impl Into<Chain>) -> Result<&mut Self, RouteError> {
        self.route(&[Method::PATCH], pattern, chain)
    }

    pub fn delete(&mut self, pattern: &str, chain: impl Into<Chain>) -> Result<&mut Self, RouteError> {
        self.route(&[Method::DELETE], pattern, chain)
    }

    /// Mount `router` under `prefix`. It sees paths with the prefix stripped.
    pub fn mount(&mut self, prefix: &str, router: impl Router) -> Result<&mut Self, RouteError> {
        self.mount_shared(prefix, Arc::new(router))
    }

    pub fn mount_shared(
        &mut self,
        prefix: &str,
        router: Arc<dyn Router>,
    ) -> Result<&mut Self, RouteError> {
        self.table.mount(prefix, router)?;
        Ok(self)
    }

    /// Number of entries, counting each mount once.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// One line per entry, in matching order.
    pub fn describe(&self) -> Vec<String> {
        self.table.describe()
    }
}

#[async_trait]
impl Router for EntryRouter {
    async fn dispatch_at(
        &self,
        path: &str,
        req: &mut Request,
        res: &mut Response,
    ) -> Result<(), DispatchError> {
        self.table.dispatch_at(path, req, res).await
    }
}

impl std::fmt::Debug for EntryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryRouter")
            .field("entries", &self.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use http::{HeaderMap, StatusCode};
    use url::Url;

    use super::*;
    use crate::core::{
        cookie::CookieOptions,
        handler::{Handler, HandlerError, handler_fn},
        session::WriteSession,
        stream,
    };

    fn request(method: Method, target: &str) -> Request {
        let url = Url::parse(&format!("http://example.com{target}")).unwrap();
        Request::new(method, url, HeaderMap::new(), stream::empty())
    }

    fn response() -> Response {
        Response::new(WriteSession::new(Arc::default(), CookieOptions::default()))
    }

    /// Writes its label and the bound params into the body.
    struct Label(&'static str);

    #[async_trait]
    impl Handler for Label {
        async fn call(&self, req: &Request, res: &mut Response) -> Result<(), HandlerError> {
            let mut params: Vec<_> = req.params().iter().collect();
            params.sort();
            res.text(format!("{} {:?}", self.0, params))?;
            Ok(())
        }
    }

    async fn run(router: &EntryRouter, method: Method, target: &str) -> Result<String, DispatchError> {
        let mut req = request(method, target);
        let mut res = response();
        router.dispatch(&mut req, &mut res).await?;
        Ok(res.body().as_text().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn test_params_and_query() {
        let mut router = EntryRouter::new();
        router.get("/users/:id", Label("user")).unwrap();

        let mut req = request(Method::GET, "/users/42?active=true");
        let mut res = response();
        router.dispatch(&mut req, &mut res).await.unwrap();

        let expected: HashMap<String, String> = [("id".to_string(), "42".to_string())].into();
        assert_eq!(req.params(), &expected);
        assert_eq!(req.query_param("active"), Some("true"));
    }

    #[tokio::test]
    async fn test_registration_order_is_priority() {
        let mut router = EntryRouter::new();
        router
            .get("/users/:id", Label("param"))
            .unwrap()
            .get("/users/me", Label("literal"))
            .unwrap();

        for _ in 0..3 {
            let body = run(&router, Method::GET, "/users/me").await.unwrap();
            assert!(body.starts_with("param"), "{body}");
        }
    }

    #[tokio::test]
    async fn test_method_filtering_and_not_found() {
        let mut router = EntryRouter::new();
        router.post("/items", Label("create")).unwrap();

        assert_eq!(run(&router, Method::POST, "/items").await.unwrap(), "create []");
        let err = run(&router, Method::GET, "/items").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut router = EntryRouter::new();
        router
            .route(&[Method::GET, Method::POST], "/dup", Label("first"))
            .unwrap()
            .get("/dup/", Label("second"))
            .unwrap();

        assert!(run(&router, Method::GET, "/dup").await.unwrap().starts_with("second"));
        assert!(run(&router, Method::POST, "/dup").await.unwrap().starts_with("first"));

        router.any("/dup", Label("third")).unwrap();
        assert_eq!(router.len(), 1);
        assert!(run(&router, Method::DELETE, "/dup").await.unwrap().starts_with("third"));

        router.get("/dup", Label("fourth")).unwrap();
        assert!(run(&router, Method::GET, "/dup").await.unwrap().starts_with("fourth"));
        assert!(run(&router, Method::PUT, "/dup").await.unwrap().starts_with("third"));
    }

    #[tokio::test]
    async fn test_re_registration_keeps_original_position() {
        let mut router = EntryRouter::new();
        router
            .route(&[Method::GET, Method::POST], "/x", Label("a"))
            .unwrap()
            .get("/:id", Label("c"))
            .unwrap()
            .get("/x", Label("b"))
            .unwrap();

        assert!(run(&router, Method::GET, "/x").await.unwrap().starts_with("b"));
        assert!(run(&router, Method::POST, "/x").await.unwrap().starts_with("a"));
        assert!(run(&router, Method::GET, "/y").await.unwrap().starts_with("c"));
        assert_eq!(router.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_method_list_is_rejected() {
        let mut router = EntryRouter::new();
        assert!(matches!(
            router.route(&[], "/x", Label("x")),
            Err(RouteError::NoMethods { .. })
        ));
    }

    #[tokio::test]
    async fn test_mount_strips_prefix_and_falls_through() {
        let mut api = EntryRouter::new();
        api.get("/users/:id", Label("api-user")).unwrap();
        api.get("/", Label("api-root")).unwrap();

        let mut root = EntryRouter::new();
        root.mount("/api/", api)
            .unwrap()
            .get("/api/health", Label("health"))
            .unwrap();

        assert_eq!(
            run(&root, Method::GET, "/api/users/7").await.unwrap(),
            r#"api-user [("id", "7")]"#
        );
        assert!(run(&root, Method::GET, "/api").await.unwrap().starts_with("api-root"));
        assert!(run(&root, Method::GET, "/api/health").await.unwrap().starts_with("health"));
        assert!(run(&root, Method::GET, "/apix/users/7").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut router = EntryRouter::new();
        router
            .get(
                "/boom",
                handler_fn(|_req, _res| {
                    Box::pin(async move { Err::<(), _>(HandlerError::new("exploded")) })
                }),
            )
            .unwrap();

        let err = run(&router, Method::GET, "/boom").await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_on_shared_router() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let mut router = EntryRouter::new();
        router
            .get(
                "/n/:n",
                handler_fn(move |req, res| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async move {
                        res.text(req.param("n").unwrap_or_default().to_string())?;
                        Ok::<_, HandlerError>(())
                    })
                }),
            )
            .unwrap();
        let router: Arc<dyn Router> = Arc::new(router);

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let router = router.clone();
                tokio::spawn(async move {
                    let mut req = request(Method::GET, &format!("/n/{n}"));
                    let mut res = response();
                    router.dispatch(&mut req, &mut res).await.unwrap();
                    assert_eq!(res.body().as_text(), Some(n.to_string().as_str()));
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 16);
    }
}
