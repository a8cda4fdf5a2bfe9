// SPDX-FileCopyrightText: 2026 Haven Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-connection transport plumbing.
//!
//! Each accepted socket gets two tasks: a reader that decodes
//! length-delimited frames, rate-limits them and hands them to the router,
//! and a writer that serially drains the connection's bounded outbound
//! queue. The reader also drives the heartbeat: a ping on a fixed interval,
//! a missed pong closes the connection. Authentication must complete within
//! its deadline or the connection is dropped.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use havenbackend::{
    rate_limiter::ConnectionRateLimiter,
    router::{ConnectionContext, Router, RouterError},
    settings::LimitSettings,
};
use havencommon::{
    identifiers::ConnectionId,
    protocol::{Envelope, Payload, Ping, RequestId},
    time,
};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{Instant, MissedTickBehavior, sleep_until},
};
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

type FrameSink = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
type FrameStream = SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;

/// Drives one client connection to completion.
pub(crate) async fn serve_connection(
    router: Arc<Router>,
    limits: LimitSettings,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let connection_id = ConnectionId::random();
    let cancellation = router.hub().shutdown_token().child_token();

    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(limits.max_message_size)
        .new_codec();
    let (sink, frames) = Framed::new(stream, codec).split();

    let (outbound_tx, outbound_rx) = mpsc::channel(limits.outbound_queue_depth.max(1));
    let writer = tokio::spawn(write_loop(sink, outbound_rx, cancellation.clone()));

    debug!(connection_id = %connection_id, %peer, "connection accepted");
    let mut ctx = ConnectionContext::new(connection_id.clone(), outbound_tx.clone(), cancellation.clone());

    read_loop(&router, &limits, &mut ctx, frames, &outbound_tx, &cancellation).await;

    // Unregistering drops the hub's clone of the outbound sender; once ours
    // are gone too, the writer drains what is queued and exits, so error
    // frames reach the peer before the socket closes.
    router.connection_closed(&ctx).await;
    drop(ctx);
    drop(outbound_tx);
    let _ = writer.await;
    cancellation.cancel();
    info!(connection_id = %connection_id, %peer, "connection closed");
}

/// Serially drains the outbound queue onto the socket.
async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<Envelope>,
    cancellation: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            maybe_envelope = outbound.recv() => {
                let Some(envelope) = maybe_envelope else {
                    break;
                };
                let frame = match envelope.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable envelope");
                        continue;
                    }
                };
                if sink.send(Bytes::from(frame)).await.is_err() {
                    cancellation.cancel();
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

/// Decodes inbound frames and feeds the router, enforcing the auth
/// deadline, the heartbeat and the per-type rate limits.
async fn read_loop(
    router: &Router,
    limits: &LimitSettings,
    ctx: &mut ConnectionContext,
    mut frames: FrameStream,
    outbound: &mpsc::Sender<Envelope>,
    cancellation: &CancellationToken,
) {
    let mut limiter = ConnectionRateLimiter::new(limits.rate_limit_per_sec);

    let auth_deadline = Instant::now() + Duration::from_secs(limits.auth_deadline_secs);
    let heartbeat_period = Duration::from_secs(limits.heartbeat_interval_secs.max(1));
    let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_period, heartbeat_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let pong_timeout = Duration::from_secs(limits.pong_timeout_secs.max(1));

    // The request id of the outstanding server ping and its deadline.
    let mut pending_pong: Option<(Vec<u8>, Instant)> = None;
    let mut ping_counter: u64 = 0;

    loop {
        let pong_deadline = pending_pong
            .as_ref()
            .map(|(_, deadline)| *deadline)
            .unwrap_or_else(|| Instant::now() + pong_timeout);

        tokio::select! {
            _ = cancellation.cancelled() => break,

            _ = sleep_until(auth_deadline), if !ctx.state().is_authenticated() => {
                info!(connection_id = %ctx.connection_id(), "authentication deadline passed");
                break;
            }

            _ = sleep_until(pong_deadline), if pending_pong.is_some() => {
                warn!(connection_id = %ctx.connection_id(), "missed heartbeat");
                break;
            }

            _ = heartbeat.tick() => {
                ping_counter += 1;
                let request_id = RequestId::new(format!("hb-{ping_counter}").into_bytes())
                    .unwrap_or_default();
                let ping = Envelope::response(
                    request_id.clone(),
                    Payload::Ping(Ping { ts: time::now_micros() }),
                );
                // Server pings share the outbound queue; a queue that cannot
                // even take a ping is overloaded.
                if outbound.try_send(ping).is_err() {
                    warn!(connection_id = %ctx.connection_id(), "outbound queue refused heartbeat");
                    break;
                }
                pending_pong = Some((
                    request_id.as_bytes().to_vec(),
                    Instant::now() + pong_timeout,
                ));
            }

            frame = frames.next() => {
                let bytes = match frame {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        // Oversize frames and transport errors end here.
                        warn!(connection_id = %ctx.connection_id(), error = %e, "frame error");
                        break;
                    }
                    None => break,
                };

                let envelope = match Envelope::decode(&bytes) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(connection_id = %ctx.connection_id(), error = %e, "malformed frame");
                        let reply = RouterError::ProtocolViolation("malformed frame".to_owned())
                            .to_envelope(RequestId::none());
                        if let Some(reply) = reply {
                            let _ = outbound.send(reply).await;
                        }
                        break;
                    }
                };

                // Answers to the server's own heartbeat never reach the
                // router.
                if let Payload::Pong(_) = &envelope.payload {
                    match &pending_pong {
                        Some((expected, _)) if envelope.request_id.as_bytes() == expected.as_slice() => {
                            pending_pong = None;
                        }
                        _ => {
                            debug!(connection_id = %ctx.connection_id(), "unsolicited pong");
                        }
                    }
                    continue;
                }

                let request_id = envelope.request_id.clone();
                if !limiter.admit(envelope.envelope_type()) {
                    if let Some(reply) = RouterError::RateLimited.to_envelope(request_id) {
                        if outbound.send(reply).await.is_err() {
                            break;
                        }
                    }
                    continue;
                }

                match router.handle_envelope(ctx, envelope).await {
                    Ok(()) => {}
                    Err(RouterError::ConnectionClosed) => break,
                    Err(e) => {
                        let fatal = e.is_fatal();
                        if !fatal {
                            debug!(connection_id = %ctx.connection_id(), error = %e, "request failed");
                        }
                        if let Some(reply) = e.to_envelope(request_id) {
                            if outbound.send(reply).await.is_err() {
                                break;
                            }
                        }
                        if fatal {
                            break;
                        }
                    }
                }
            }
        }
    }
}
