use httpd::config::Config;
use httpd::http::{StatusCode, handler_fn};
use httpd::server::{Router, Server};

fn routes() -> anyhow::Result<Router> {
    let mut router = Router::new();

    router.get(
        "/a",
        handler_fn(|w, _r| {
            Box::pin(async move {
                let _ = w.write(b"go to a").await;
            })
        }),
    )?;

    router.get(
        "/:a",
        handler_fn(|w, r| {
            Box::pin(async move {
                let body = format!("go to :..  {}", r.query("a").unwrap_or_default());
                let _ = w.write(body.as_bytes()).await;
            })
        }),
    )?;

    router.get(
        "/ab/*a",
        handler_fn(|w, r| {
            Box::pin(async move {
                let body = format!("go to *..  {}", r.query("a").unwrap_or_default());
                let _ = w.write(body.as_bytes()).await;
            })
        }),
    )?;

    // Lists the fields and files of a multipart upload.
    router.post(
        "/upload",
        handler_fn(|w, r| {
            Box::pin(async move {
                let summary = match r.multipart_form().await {
                    Ok(form) => {
                        let mut lines = Vec::new();
                        for (name, value) in &form.value {
                            lines.push(format!("field {name} = {value}"));
                        }
                        for (name, file) in &form.file {
                            lines.push(format!("file {name} = {} ({} bytes)", file.filename, file.size));
                        }
                        lines.sort();
                        lines.join("\n")
                    }
                    Err(e) => {
                        w.write_status(StatusCode::BAD_REQUEST);
                        e.to_string()
                    }
                };
                let _ = w.write(summary.as_bytes()).await;
            })
        }),
    )?;

    Ok(router)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let server = Server::new(cfg, routes()?);

    tokio::select! {
        res = server.listen_and_serve() => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
