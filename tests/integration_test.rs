//! End-to-end scenarios exercising the promise, coroutine, and stream
//! layers together, rather than any one module in isolation.

use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use weave::prelude::*;

fn loop_handle() -> Rc<dyn EventLoop> {
    Rc::new(TokioEventLoop::new().unwrap())
}

/// Scenario 1: a coroutine accepts one connection, reads one line, writes
/// it back, and closes — the whole interaction driven by a single
/// `run()`, with both sides of the wire modeled as their own coroutines
/// so neither needs the test to step the loop between stages.
#[test]
fn echo_scenario_reads_one_line_writes_it_back_then_closes() {
    let lp = loop_handle();
    let server = {
        let bind = Server::bind(lp.clone(), "127.0.0.1:0");
        lp.run();
        bind.get_result().unwrap()
    };
    let addr = server.local_addr().unwrap().to_string();

    let server_side = coroutine(lp.clone(), {
        let server = server.clone();
        move || async move {
            let conn = server.accept().await?;
            let line = conn.read(None, Some(b'\n')).await?;
            conn.write(line.clone()).await?;
            conn.end(None).await?;
            Ok(line)
        }
    });

    let client_side = coroutine(lp.clone(), {
        let lp2 = lp.clone();
        move || async move {
            let client = SocketStream::connect(lp2.clone(), &addr).await?;
            client.write(Bytes::from_static(b"hi\n")).await?;
            let reply = client.read(None, Some(b'\n')).await?;
            Ok(reply)
        }
    });

    lp.run();
    assert_eq!(server_side.get_result().unwrap(), Bytes::from_static(b"hi\n"));
    assert_eq!(client_side.get_result().unwrap(), Bytes::from_static(b"hi\n"));
}

/// Scenario 2: three clients connect to one server; the first to connect
/// sends a line that is relayed to the other two, and only those two.
#[test]
fn broadcast_chat_scenario_relays_to_the_other_two_clients() {
    let lp = loop_handle();
    let server = {
        let bind = Server::bind(lp.clone(), "127.0.0.1:0");
        lp.run();
        bind.get_result().unwrap()
    };
    let addr = server.local_addr().unwrap().to_string();

    let hub = coroutine(lp.clone(), {
        let server = server.clone();
        move || async move {
            // Accept order mirrors connect order below: every connect is
            // awaited to completion before the next one starts, so the
            // listener's accept queue sees them in the same sequence.
            let a = server.accept().await?;
            let b = server.accept().await?;
            let c = server.accept().await?;
            let msg = a.read(None, Some(b'\n')).await?;
            b.write(msg.clone()).await?;
            c.write(msg.clone()).await?;
            Ok(msg)
        }
    });

    let clients = coroutine(lp.clone(), {
        let lp2 = lp.clone();
        move || async move {
            let client_a = SocketStream::connect(lp2.clone(), &addr).await?;
            let client_b = SocketStream::connect(lp2.clone(), &addr).await?;
            let client_c = SocketStream::connect(lp2.clone(), &addr).await?;
            client_a.write(Bytes::from_static(b"x\n")).await?;
            let msg_b = client_b.read(None, Some(b'\n')).await?;
            let msg_c = client_c.read(None, Some(b'\n')).await?;
            Ok((msg_b, msg_c))
        }
    });

    lp.run();
    assert_eq!(hub.get_result().unwrap(), Bytes::from_static(b"x\n"));
    let (msg_b, msg_c) = clients.get_result().unwrap();
    assert_eq!(msg_b, Bytes::from_static(b"x\n"));
    assert_eq!(msg_c, Bytes::from_static(b"x\n"));
}

/// Scenario 3: `join` of mixed outcomes rejects with the one rejection.
#[test]
fn join_of_mixed_outcomes_rejects_with_the_failure() {
    let lp = loop_handle();
    let mut inputs = HashMap::new();
    inputs.insert("a", Promise::resolved(lp.clone(), 1));
    inputs.insert("b", Promise::rejected(lp.clone(), Error::Timeout));
    inputs.insert("c", Promise::resolved(lp.clone(), 3));
    let joined = join(lp.clone(), inputs);
    lp.run();
    assert_eq!(joined.get_result().unwrap_err(), Error::Timeout);
}

/// Scenario 4: `settle` of the same inputs never rejects and reports
/// every child's own outcome.
#[test]
fn settle_of_mixed_outcomes_captures_every_child() {
    let lp = loop_handle();
    let mut inputs = HashMap::new();
    inputs.insert("a", Promise::resolved(lp.clone(), 1));
    inputs.insert("b", Promise::rejected(lp.clone(), Error::Timeout));
    inputs.insert("c", Promise::resolved(lp.clone(), 3));
    let settled = settle(lp.clone(), inputs);
    lp.run();
    let result = settled.get_result().unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result.get("a"), Some(&Ok(1)));
    assert_eq!(result.get("b"), Some(&Err(Error::Timeout)));
    assert_eq!(result.get("c"), Some(&Ok(3)));
}

/// Scenario 5: cancelling every descendant of a pending promise cascades
/// the cancellation back to the parent.
#[test]
fn cancel_cascade_reaches_the_parent_once_every_child_cancels() {
    let lp = loop_handle();
    let parent: Promise<i32> = Promise::new(lp.clone(), |_resolver| {});
    let child_one = parent.map(|v| v + 1);
    let child_two = parent.map(|v| v * 2);

    child_one.cancel(None);
    child_two.cancel(None);
    lp.run();

    assert!(parent.is_rejected());
    assert_eq!(parent.get_result().unwrap_err(), Error::Cancelled);
}

/// Scenario 6: piping a bounded length off a source that holds more than
/// that length leaves the remainder in the source, untouched.
#[test]
fn pipe_stops_at_the_requested_length_and_leaves_the_remainder() {
    let lp = loop_handle();
    let (source, source_peer) = weave::testing::create_pipe(lp.clone());
    let (dest, dest_peer) = weave::testing::create_pipe(lp.clone());

    source_peer.write(Bytes::from_static(b"abcdef")).done(None, None);

    let source_handle: Rc<dyn Readable> = Rc::new(source.clone());
    let dest_handle: Rc<dyn Writable> = Rc::new(dest);
    let piped = pipe(source_handle, dest_handle, false, Some(4), None);

    lp.run();
    assert_eq!(piped.get_result().unwrap(), 4);

    let captured = dest_peer.read(Some(4), None);
    let remainder = source.read(None, None);
    lp.run();
    assert_eq!(captured.get_result().unwrap(), Bytes::from_static(b"abcd"));
    assert_eq!(remainder.get_result().unwrap(), Bytes::from_static(b"ef"));
}
