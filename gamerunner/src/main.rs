//! Demonstration binary wiring [`netcode`]'s `ServerCore` over an in-memory
//! [`transport::InMemoryTransport`] and [`entity::InMemoryEntityStore`]: loads config,
//! initializes logging, registers the core message handlers, and drives a fixed-tick
//! loop through a scripted connect/join/chat/disconnect session.
//!
//! Swapping `InMemoryTransport` for a real KCP/TCP/libuv binding and
//! `InMemoryEntityStore` for the game's own scene graph is the only change needed to go
//! from this demo to a production deployment; neither is part of this crate (see
//! [`netcode::transport`] and [`netcode::entity`]).

mod config;
mod entity;
mod transport;

use clap::{App, Arg};
use config::GameConfig;
use entity::InMemoryEntityStore;
use flux::logging::{self, info};
use hashbrown::HashMap;
use netcode::dispatch::{ConnectionLookup, Dispatcher};
use netcode::message::{Chat, Connect, Disconnect, JoinWorld, Joined, Message, PrefabId, Spawn};
use netcode::server::{route_transport_event, EventQueue, ServerCore};
use netcode::transport::{Channel, ConnectionId};
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Instant;
use transport::InMemoryTransport;

type GameServer = ServerCore<InMemoryTransport, InMemoryEntityStore>;

/// Tracks per-connection authentication independently of [`GameServer`]'s own
/// connection table: the dispatcher's handler context and the server are distinct
/// parameters of `handle_connected`/`handle_disconnected`, so a real deployment's
/// authenticator module would own a context like this rather than reaching into the
/// server directly.
struct DemoCtx {
    authenticated: HashMap<ConnectionId, bool>,
}

impl ConnectionLookup for DemoCtx {
    fn is_authenticated(&self, connection: ConnectionId) -> bool {
        self.authenticated.get(&connection).copied().unwrap_or(false)
    }
}

fn main() {
    let matches = App::new("Game Server")
        .version("0.1")
        .author("Bush Hammer Industries")
        .about("Runs the authoritative game server core over a demonstration in-memory transport.")
        .arg(Arg::with_name("CONFIG_FILE").help("Path to the config TOML file").required(false))
        .get_matches();

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => GameConfig::load(path),
        None => GameConfig::default(),
    };

    let log = logging::init_default();
    info!(log, "starting game server";
        "address" => &config.server.address, "tick_hz" => config.game.tick_rate_hz);

    let transport = InMemoryTransport::new(1200);
    let entities = InMemoryEntityStore::new();
    let mut server: GameServer = ServerCore::new(
        transport,
        entities,
        config.server.max_clients,
        config.batch_interval(),
        log.new(logging::o!()),
    );

    let mut dispatcher: Dispatcher<DemoCtx> = Dispatcher::new(1200, log.new(logging::o!()));
    let mut ctx = DemoCtx { authenticated: HashMap::new() };

    dispatcher
        .register::<Connect, _>(false, |ctx: &mut DemoCtx, connection, _message| {
            ctx.authenticated.insert(connection, true);
        })
        .expect("connect handler already registered");

    dispatcher
        .register::<Disconnect, _>(false, |ctx: &mut DemoCtx, connection, _message| {
            ctx.authenticated.remove(&connection);
        })
        .expect("disconnect handler already registered");

    let chat_log = log.new(logging::o!());
    dispatcher
        .register::<Chat, _>(true, move |_ctx, connection, message: Chat| {
            info!(chat_log, "chat received";
                "connection" => connection, "sender" => message.sender, "text" => message.text);
        })
        .expect("chat handler already registered");

    let join_requests: Rc<RefCell<Vec<(ConnectionId, PrefabId)>>> = Rc::new(RefCell::new(Vec::new()));
    let join_requests_handler = join_requests.clone();
    dispatcher
        .register::<JoinWorld, _>(true, move |_ctx, connection, message: JoinWorld| {
            join_requests_handler.borrow_mut().push((connection, message.prefab));
        })
        .expect("join handler already registered");

    server.start();

    // A scripted session standing in for a real transport's connect/data/disconnect
    // stream: one client connects, asks to join the world, sends a chat line, and
    // leaves a few ticks later.
    server.transport_mut().simulate_connect(1);

    let mut next_entity_id = 1u64;
    let mut now = Instant::now();

    for tick in 0..8u32 {
        let mut events = EventQueue::default();
        server.transport_mut().tick(&mut events);
        for event in events.events {
            route_transport_event(&mut server, &mut dispatcher, &mut ctx, event, now);
        }

        for (connection, _prefab) in join_requests.borrow_mut().drain(..) {
            let entity = next_entity_id;
            next_entity_id += 1;
            server.join_world(connection, entity);
            server.entities_mut().add_observer(entity, connection);

            server.send(&mut dispatcher, connection, &Joined, Channel::Reliable, now);
            let spawn = Spawn {
                prefab: [0u8; 16],
                net_id: entity,
                owned: true,
                position: (0.0, 0.0, 0.0),
                rotation: netcode::bitcodec::Quaternion::IDENTITY,
            };
            server.send(&mut dispatcher, connection, &spawn, Channel::Reliable, now);
        }

        if tick == 2 {
            server.transport_mut().simulate_data(1, encode_chat("tom", "hello world"));
        }
        if tick == 5 {
            server.transport_mut().simulate_disconnect(1);
        }
        // tick 5's disconnect is drained by tick 6's `transport.tick()` call above, and
        // tick 7 runs once more so the resulting batch flush/log line is visible.

        server.tick_batches(now);
        server.tick_idle_timeouts(now);
        for connection in server.transport_mut().take_disconnect_requests() {
            info!(log, "transport requested disconnect"; "connection" => connection);
        }

        now += config.tick_interval();
        thread::sleep(config.tick_interval());
    }

    server.stop();
    info!(log, "game server stopped");
}

fn encode_chat(sender: &str, text: &str) -> Vec<u8> {
    let mut writer = netcode::bitcodec::Writer::new(256);
    writer.write_byte_bits(Chat::id(), 8);
    Chat { sender: sender.to_string(), text: text.to_string() }.serialize(&mut writer);
    writer.segment().to_vec()
}
