//! Minimal TCP echo demo built entirely on the public `weave` API: a
//! server that pipes every accepted connection back to itself, and a
//! client that writes one line and prints what comes back.
//!
//! Run a server in one terminal and a client against it in another:
//!
//! ```text
//! weave-echo-demo server 127.0.0.1:7878
//! weave-echo-demo client 127.0.0.1:7878 "hello there"
//! ```

use std::rc::Rc;

use bytes::Bytes;
use weave::{pipe, EventLoop, Readable, Server, SocketStream, TokioEventLoop, Writable};

fn main() {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("server") => {
            let addr = args.next().unwrap_or_else(|| "127.0.0.1:7878".to_string());
            run_server(&addr);
        }
        Some("client") => {
            let addr = args.next().unwrap_or_else(|| "127.0.0.1:7878".to_string());
            let line = args.next().unwrap_or_else(|| "hello, weave".to_string());
            run_client(&addr, &line);
        }
        _ => {
            eprintln!("usage: weave-echo-demo <server|client> [addr] [line]");
            std::process::exit(2);
        }
    }
}

fn run_server(addr: &str) {
    let lp: Rc<dyn EventLoop> = Rc::new(TokioEventLoop::new().expect("failed to start event loop"));
    let server = Server::bind(lp.clone(), addr);
    server
        .then_full(
            {
                let lp = lp.clone();
                let addr = addr.to_string();
                move |server| {
                    println!("listening on {addr}");
                    server.with_error_handler(|err| eprintln!("accept error: {err}")).serve(move |conn| {
                        println!("connection from {}", conn.remote_addr());
                        let source: Rc<dyn Readable> = Rc::new(conn.clone());
                        let dest: Rc<dyn Writable> = Rc::new(conn);
                        pipe(source, dest, true, None, Some(b'\n')).done(None, None);
                    });
                    weave::Resolution::Value(())
                }
            },
            |err| {
                eprintln!("failed to bind: {err}");
                weave::Resolution::Value(())
            },
        )
        .done(None, None);
    // A server runs until the process is killed; `run()` only returns
    // once every spawned task completes, and the accept loop never does.
    lp.run();
}

fn run_client(addr: &str, line: &str) {
    let lp: Rc<dyn EventLoop> = Rc::new(TokioEventLoop::new().expect("failed to start event loop"));
    let mut message = line.as_bytes().to_vec();
    message.push(b'\n');
    let message = Bytes::from(message);

    let connect_promise = SocketStream::connect(lp.clone(), addr);
    lp.run();
    let conn = connect_promise.get_result().expect("connect failed");

    let write_promise = conn.write(message);
    let read_promise = conn.read(None, Some(b'\n'));
    lp.run();
    write_promise.get_result().expect("write failed");
    let reply = read_promise.get_result().expect("read failed");

    print!("{}", String::from_utf8_lossy(&reply));
}
