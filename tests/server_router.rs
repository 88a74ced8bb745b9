// End-to-end: a ServerRouter on an ephemeral port answering a hyper client
#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use bytes::Bytes;
    use http::{Method, Request, StatusCode, header};
    use http_body_util::{BodyExt, Full};
    use hyper_util::{
        client::legacy::{Client, connect::HttpConnector},
        rt::TokioExecutor,
    };
    use serde_json::Value;
    use tokio::{io::AsyncWriteExt, net::TcpStream, sync::mpsc};
    use switchyard::{
        HttpServer, ServerRouter,
        adapters::builtin_modules,
        config::ServerConfig,
        core::{
            handler::{HandlerError, handler_fn},
            request::BodyError,
            router::EntryRouter,
            server::ServerSettings,
            stream::{self, StreamError},
        },
        utils::{GracefulShutdown, ShutdownReason},
    };

    type HttpClient = Client<HttpConnector, Full<Bytes>>;

    struct Running {
        server: Arc<ServerRouter>,
        shutdown: Arc<GracefulShutdown>,
        handle: tokio::task::JoinHandle<eyre::Result<()>>,
        client: HttpClient,
    }

    impl Running {
        async fn start(router: EntryRouter, settings: ServerSettings) -> Self {
            let shutdown = Arc::new(GracefulShutdown::with_timeout(Duration::from_secs(2)));
            let server = Arc::new(
                ServerRouter::bind("127.0.0.1:0".parse().unwrap(), Arc::new(router), settings)
                    .await
                    .unwrap()
                    .with_shutdown(shutdown.clone()),
            );
            let runner = server.clone();
            let handle = tokio::spawn(async move { runner.run().await });
            let client = Client::builder(TokioExecutor::new()).build_http();
            Self {
                server,
                shutdown,
                handle,
                client,
            }
        }

        fn url(&self, target: &str) -> String {
            format!("http://{}{}", self.server.local_addr(), target)
        }

        async fn send(&self, request: Request<Full<Bytes>>) -> (StatusCode, http::HeaderMap, Bytes) {
            let response = self.client.request(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (status, headers, body)
        }

        async fn get(&self, target: &str) -> (StatusCode, http::HeaderMap, Bytes) {
            let request = Request::get(self.url(target))
                .body(Full::new(Bytes::new()))
                .unwrap();
            self.send(request).await
        }

        async fn stop(self) {
            self.shutdown.trigger(ShutdownReason::Requested);
            let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
                .await
                .expect("server did not stop in time")
                .unwrap();
            assert!(result.is_ok());
            // The listener is consumed by the first run.
            assert!(self.server.run().await.is_err());
        }
    }

    async fn configured() -> Running {
        let config = ServerConfig::sample();
        let router = config
            .build_router(Arc::new(builtin_modules::registry()))
            .unwrap();
        Running::start(router, config.server_settings().unwrap()).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_echo_through_real_socket() {
        let running = configured().await;

        let request = Request::builder()
            .method(Method::POST)
            .uri(running.url("/api/echo/a/b%20c?active=true"))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-proto", "https")
            .body(Full::new(Bytes::from_static(br#"{"name":"switchyard"}"#)))
            .unwrap();
        let (status, headers, body) = running.send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let echoed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["params"]["rest"], "a/b c");
        assert_eq!(echoed["query"]["active"], "true");
        assert_eq!(echoed["body"]["name"], "switchyard");
        let url = echoed["url"].as_str().unwrap();
        assert!(url.starts_with("https://127.0.0.1:"), "{url}");

        running.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_session_cookie_round_trip() {
        let running = configured().await;

        let (status, headers, body) = running.get("/visits").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(br#"{"visits":1}"#));
        let cookie = headers[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("visits=1"), "{cookie}");
        assert!(cookie.contains("HttpOnly"));

        let request = Request::get(running.url("/visits"))
            .header(header::COOKIE, "visits=1")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let (_, _, body) = running.send(request).await;
        assert_eq!(body, Bytes::from_static(br#"{"visits":2}"#));

        running.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unmatched_route_and_method() {
        let running = configured().await;

        let (status, _, _) = running.get("/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = Request::delete(running.url("/health"))
            .body(Full::new(Bytes::new()))
            .unwrap();
        let (status, _, _) = running.send(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, body) = running.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(br#"{"status":"ok"}"#));

        running.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_streamed_upload_and_download() {
        let mut router = EntryRouter::new();
        router
            .post(
                "/upload",
                handler_fn(|req, res| {
                    Box::pin(async move {
                        let bytes = req.bytes().await?;
                        res.text(bytes.len().to_string())?;
                        Ok::<_, HandlerError>(())
                    })
                }),
            )
            .unwrap()
            .get(
                "/download",
                handler_fn(|_req, res| {
                    Box::pin(async move {
                        res.stream(stream::from_chunks(vec!["alpha ", "beta ", "gamma"]))?;
                        Ok::<_, HandlerError>(())
                    })
                }),
            )
            .unwrap();
        let settings = ServerSettings {
            max_body_bytes: 64 * 1024,
            stream_capacity: 2,
            ..ServerSettings::default()
        };
        let running = Running::start(router, settings).await;

        let payload = Bytes::from(vec![7u8; 40 * 1024]);
        let request = Request::post(running.url("/upload"))
            .body(Full::new(payload))
            .unwrap();
        let (status, _, body) = running.send(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from("40960"));

        let (status, headers, body) = running.get("/download").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(body, Bytes::from_static(b"alpha beta gamma"));

        running.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_client_disconnect_mid_upload() {
        let (seen, mut outcomes) = mpsc::channel(1);
        let mut router = EntryRouter::new();
        router
            .post(
                "/upload",
                handler_fn(move |req, res| {
                    let seen = seen.clone();
                    Box::pin(async move {
                        let outcome = req.bytes().await.map(|bytes| bytes.len());
                        let _ = seen.send(outcome).await;
                        res.text("done")?;
                        Ok::<_, HandlerError>(())
                    })
                }),
            )
            .unwrap();
        let running = Running::start(router, ServerSettings::default()).await;

        let mut socket = TcpStream::connect(running.server.local_addr()).await.unwrap();
        socket
            .write_all(b"POST /upload HTTP/1.1\r\nhost: localhost\r\ncontent-length: 1000\r\n\r\npartial")
            .await
            .unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(socket);

        let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await
            .expect("handler never saw the body end")
            .unwrap();
        assert!(
            matches!(outcome, Err(BodyError::Stream(StreamError::ConnectionClosed))),
            "{outcome:?}"
        );

        running.stop().await;
    }
}
