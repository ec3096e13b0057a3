use std::sync::Arc;

use httpd::config::Config;
use httpd::http::connection::Connection;
use httpd::http::{Handler, Method, Request, ResponseWriter, handler_fn};
use httpd::server::{RouteError, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Writes its name followed by the captured `a` parameter, if any.
struct Named(&'static str);

impl Handler for Named {
    async fn serve(&self, w: &mut ResponseWriter<'_>, r: &mut Request<'_>) {
        let reply = format!("{} {}", self.0, r.query("a").unwrap_or("-"));
        let _ = w.write(reply.as_bytes()).await;
    }
}

fn params(router: &Router, method: Method, path: &str) -> Option<Vec<(String, String)>> {
    router.lookup(&method, path).map(|(_, params)| params)
}

fn pair(k: &str, v: &str) -> (String, String) {
    (k.to_string(), v.to_string())
}

#[test]
fn test_static_param_and_catch_all() {
    let mut router = Router::new();
    router.get("/a", Named("a")).unwrap();
    router.get("/:a", Named("param")).unwrap();
    router.get("/ab/*a", Named("catch-all")).unwrap();

    assert_eq!(params(&router, Method::GET, "/a"), Some(vec![]));
    assert_eq!(params(&router, Method::GET, "/xyz"), Some(vec![pair("a", "xyz")]));
    assert_eq!(params(&router, Method::GET, "/ab/x/y"), Some(vec![pair("a", "/x/y")]));
    assert_eq!(params(&router, Method::GET, "/ab/"), Some(vec![pair("a", "/")]));
    assert_eq!(params(&router, Method::POST, "/a"), None);
    assert_eq!(params(&router, Method::GET, "/"), None);
}

#[test]
fn test_lookup_backtracks_from_static_to_param() {
    let mut router = Router::new();
    router.get("/users/new", Named("new")).unwrap();
    router.get("/users/:id/posts", Named("posts")).unwrap();

    // "/users/new/posts" starts down the static branch, which has no
    // "posts" child, and must fall back to the parameter.
    assert_eq!(
        params(&router, Method::GET, "/users/new/posts"),
        Some(vec![pair("id", "new")])
    );
    assert_eq!(params(&router, Method::GET, "/users/new"), Some(vec![]));
    assert_eq!(params(&router, Method::GET, "/users/7"), None);
}

#[test]
fn test_root_route() {
    let mut router = Router::new();
    router.get("/", Named("root")).unwrap();
    assert_eq!(params(&router, Method::GET, "/"), Some(vec![]));
    assert_eq!(params(&router, Method::GET, "/other"), None);
}

#[test]
fn test_registration_errors() {
    let mut router = Router::new();
    router.get("/files/:name", Named("f")).unwrap();
    router.get("/static/*path", Named("s")).unwrap();

    assert!(matches!(router.get("relative", Named("x")), Err(RouteError::NotAbsolute(_))));
    assert!(matches!(router.get("/x/:", Named("x")), Err(RouteError::EmptyWildcardName(_))));
    assert!(matches!(router.get("/x/*", Named("x")), Err(RouteError::EmptyWildcardName(_))));
    assert!(matches!(
        router.get("/files/:id", Named("x")),
        Err(RouteError::ParamConflict { .. })
    ));
    assert!(matches!(
        router.get("/static/css", Named("x")),
        Err(RouteError::CatchAllConflict { .. })
    ));
    assert!(matches!(
        router.get("/files/*rest", Named("x")),
        Err(RouteError::CatchAllConflict { .. })
    ));
    assert!(matches!(
        router.get("/x/*rest/more", Named("x")),
        Err(RouteError::CatchAllNotTerminal(_))
    ));
    assert!(matches!(
        router.get("/files/:name", Named("x")),
        Err(RouteError::Duplicate { .. })
    ));

    // The same path under another method is a different route.
    router.post("/files/:name", Named("x")).unwrap();
}

#[tokio::test]
async fn test_router_serves_and_404s() {
    let mut router = Router::new();
    router.get("/a", Named("a")).unwrap();
    router.get("/:a", Named("param")).unwrap();

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let conn = Connection::new(server, None, Arc::new(router), Arc::new(Config::default()));
    let task = tokio::spawn(conn.serve());

    client
        .write_all(
            b"GET /hello HTTP/1.1\r\n\r\n\
              GET /missing/deeper HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 11\r\n\r\nparam hello\
         HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"
    );
    task.await.unwrap();
}

#[tokio::test]
async fn test_closure_routes_are_served() {
    let mut router = Router::new();
    router
        .get(
            "/hi/:name",
            handler_fn(|w, r| {
                Box::pin(async move {
                    let reply = format!("hi {}", r.query("name").unwrap_or("?"));
                    let _ = w.write(reply.as_bytes()).await;
                })
            }),
        )
        .unwrap();

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let conn = Connection::new(server, None, Arc::new(router), Arc::new(Config::default()));
    let task = tokio::spawn(conn.serve());

    client
        .write_all(b"GET /hi/bob HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 6\r\n\r\nhi bob"
    );
    task.await.unwrap();
}
