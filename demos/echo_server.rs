use mill_stream::prelude::*;
use std::sync::Arc;

/// Prints loop events to stderr
struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&self, level: LogLevel, message: &str) {
        if level >= LogLevel::Info {
            eprintln!("[{:?}] {}", level, message);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let config = LoopConfig::builder()
        .read_buffer_size(16 * 1024)
        .logger(Arc::new(StderrLogger))
        .build();
    let event_loop = EventLoop::new(config)?;

    let addr = "127.0.0.1:7878".parse()?;
    let server = event_loop.tcp_listen(addr)?;
    println!("Echo server listening on {}", addr);

    let streams = event_loop.streams().clone();
    let reactor = Arc::clone(event_loop.reactor());
    let listener = server.clone();

    streams.clone().listen(
        &server,
        128,
        Box::new(move |args| {
            if let Some(err) = args.first().and_then(Value::as_error) {
                eprintln!("connection error: {}", err);
                return;
            }

            let client = reactor.tcp_init();
            if let Err(e) = streams.accept(&listener, &client) {
                eprintln!("accept failed: {}", e);
                return;
            }
            println!("Client connected: {:?}", client.id());

            let echo = streams.clone();
            let conn = client.clone();
            let started = streams.read_start(
                &client,
                Box::new(move |args| match args.as_slice() {
                    [Value::Nil, Value::Bytes(data)] => {
                        if let Err(e) = echo.write(&conn, data, None) {
                            eprintln!("write failed: {}", e);
                        }
                    }
                    [] => {
                        println!("Client disconnected: {:?}", conn.id());
                        let closer = echo.clone();
                        let closing = conn.clone();
                        let _ = echo.shutdown(
                            &conn,
                            Some(Box::new(move |_| {
                                let _ = closer.close(&closing);
                            })),
                        );
                    }
                    _ => {
                        let _ = echo.close(&conn);
                    }
                }),
            );
            if let Err(e) = started {
                eprintln!("read_start failed: {}", e);
            }
        }),
    )?;

    event_loop.run()
}
