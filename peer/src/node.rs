//! The peer itself: one client role always, plus at most one server role
//! (primary or backup) that changes over the node's lifetime. All inbound
//! requests funnel through [`PeerNode::dispatch`], and all promotion
//! directives carried in replies funnel through [`PeerNode::process_reply`].

use crate::backup::BackupServer;
use crate::client::{self, ClientRole, Credentials, GameView};
use crate::network::{self, RpcError, RpcListener};
use crate::primary::PrimaryServer;
use crate::tasks::TaskGuard;
use log::{info, warn};
use shared::{
    Direction, GameState, Move, MoveReply, PeerHandle, Promotion, Request, Response,
    ServerSecrets, DORMANT_AFTER, ENROLLMENT_WINDOW, HEARTBEAT_INTERVAL, RPC_TIMEOUT,
    SWEEP_INTERVAL,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Bind address for the RPC listener. Port 0 picks an ephemeral port.
    pub listen: String,
    pub board_size: u32,
    pub treasure_count: u32,
    pub enrollment_window: Duration,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
    pub dormant_after: Duration,
    pub rpc_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:0".to_string(),
            board_size: 10,
            treasure_count: 10,
            enrollment_window: ENROLLMENT_WINDOW,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            sweep_interval: SWEEP_INTERVAL,
            dormant_after: DORMANT_AFTER,
            rpc_timeout: RPC_TIMEOUT,
        }
    }
}

impl NodeConfig {
    /// Shrunk timings so failover paths run in milliseconds under test.
    pub fn for_tests() -> Self {
        Self {
            listen: "127.0.0.1:0".to_string(),
            board_size: 5,
            treasure_count: 3,
            enrollment_window: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(100),
            sweep_interval: Duration::from_millis(200),
            dormant_after: Duration::from_millis(400),
            rpc_timeout: Duration::from_millis(250),
        }
    }
}

enum ServerRole {
    None,
    Primary {
        server: Arc<PrimaryServer>,
        /// Enrollment and sweep timers die with the role.
        _timers: Vec<TaskGuard>,
    },
    Backup {
        server: Arc<BackupServer>,
    },
}

pub struct PeerNode {
    handle: PeerHandle,
    config: NodeConfig,
    client: Mutex<ClientRole>,
    role: Mutex<ServerRole>,
    tasks: Mutex<Vec<TaskGuard>>,
}

impl PeerNode {
    /// Boots the well-known peer: binds the listener, takes the primary role
    /// and enrolls itself as the first player.
    pub async fn host(
        config: NodeConfig,
        view: Box<dyn GameView>,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        if config.board_size == 0 {
            return Err("board size must be at least 1".into());
        }

        let listener = RpcListener::bind(&config.listen).await?;
        let handle = PeerHandle(listener.local_addr()?);
        info!("hosting a new game at {handle}");

        let node = Arc::new(Self::new(handle, config.clone(), view));

        let server = Arc::new(PrimaryServer::bootstrap(handle, config));
        let reply = server.join(handle).await;
        let (Some(player_id), Some(auth_code)) = (reply.player_id, reply.auth_code) else {
            return Err("bootstrap self-enrollment was declined".into());
        };
        node.client
            .lock()
            .await
            .set_credentials(Credentials {
                player_id,
                auth_code,
            });

        let timers = vec![server.start_enrollment_timer(), server.start_sweep()];
        *node.role.lock().await = ServerRole::Primary {
            server,
            _timers: timers,
        };

        node.spawn_core_tasks(listener).await;
        Ok(node)
    }

    /// Joins a game hosted at `server_addr`. The second joiner is told to
    /// stand up the backup role; its replica starts empty and is filled by
    /// the first pushed update.
    pub async fn join(
        config: NodeConfig,
        server_addr: SocketAddr,
        view: Box<dyn GameView>,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let listener = RpcListener::bind(&config.listen).await?;
        let handle = PeerHandle(listener.local_addr()?);

        let request = Request::Join { caller: handle };
        let response = network::call(server_addr, &request, config.rpc_timeout).await?;
        let Response::Join(reply) = response else {
            return Err("unexpected response to join request".into());
        };
        let (Some(player_id), Some(auth_code)) = (reply.player_id, reply.auth_code) else {
            return Err("join declined; the game may have already started".into());
        };
        info!("joined game at {server_addr} as {player_id}");

        let node = Arc::new(Self::new(handle, config.clone(), view));
        node.client.lock().await.set_credentials(Credentials {
            player_id: player_id.clone(),
            auth_code: auth_code.clone(),
        });

        if reply.become_backup {
            info!("enrolled as the backup peer");
            let replica = GameState::new(config.board_size, PeerHandle(server_addr));
            let server = Arc::new(BackupServer::new(
                handle,
                player_id,
                auth_code,
                replica,
                ServerSecrets::default(),
                config,
            ));
            *node.role.lock().await = ServerRole::Backup { server };
        }

        node.spawn_core_tasks(listener).await;
        Ok(node)
    }

    fn new(handle: PeerHandle, config: NodeConfig, view: Box<dyn GameView>) -> Self {
        Self {
            handle,
            config,
            client: Mutex::new(ClientRole::new(view)),
            role: Mutex::new(ServerRole::None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    async fn spawn_core_tasks(self: &Arc<Self>, listener: RpcListener) {
        let serve_node = Arc::clone(self);
        let serve = TaskGuard::new(tokio::spawn(async move {
            listener.serve(serve_node).await;
        }));
        let heartbeat = client::start_heartbeat(self);
        self.tasks.lock().await.extend([serve, heartbeat]);
    }

    pub fn handle(&self) -> PeerHandle {
        self.handle
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &Mutex<ClientRole> {
        &self.client
    }

    pub async fn snapshot(&self) -> Option<GameState> {
        self.client.lock().await.snapshot()
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.client.lock().await.credentials()
    }

    pub async fn is_primary(&self) -> bool {
        matches!(&*self.role.lock().await, ServerRole::Primary { .. })
    }

    pub async fn is_backup(&self) -> bool {
        matches!(&*self.role.lock().await, ServerRole::Backup { .. })
    }

    /// Drops the server role and every background task. Used when tearing a
    /// peer down without dropping the `Arc` handles tests still hold.
    pub async fn shutdown(&self) {
        self.tasks.lock().await.clear();
        *self.role.lock().await = ServerRole::None;
    }

    async fn primary_server(&self) -> Option<Arc<PrimaryServer>> {
        match &*self.role.lock().await {
            ServerRole::Primary { server, .. } => Some(Arc::clone(server)),
            _ => None,
        }
    }

    async fn backup_server(&self) -> Option<Arc<BackupServer>> {
        match &*self.role.lock().await {
            ServerRole::Backup { server } => Some(Arc::clone(server)),
            _ => None,
        }
    }

    /// Routes one inbound request to the role that owns it. A request for a
    /// role this peer does not hold is denied, never forwarded; the caller's
    /// picture of who is who is stale and the denial tells it so.
    pub async fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Join { caller } => match self.primary_server().await {
                Some(server) => Response::Join(server.join(caller).await),
                None => self.deny("join"),
            },
            Request::Move {
                caller,
                direction,
                player_id,
                auth_code,
            } => match self.primary_server().await {
                Some(server) => {
                    let mv = Move {
                        direction,
                        player_id,
                    };
                    Response::Move(server.do_move(caller, mv, &auth_code).await)
                }
                None => self.deny("move"),
            },
            Request::Ping {
                caller,
                player_id,
                auth_code,
            } => match self.primary_server().await {
                Some(server) => match server.ping(caller, &player_id, &auth_code).await {
                    Some(reply) => Response::Ping(reply),
                    None => Response::Denied,
                },
                None => self.deny("ping"),
            },
            Request::BackupUpdate { snapshot, secrets } => match self.backup_server().await {
                Some(server) => {
                    server.update(snapshot, secrets).await;
                    Response::Ack
                }
                None => self.deny("backup update"),
            },
            Request::PrimaryDied {
                caller,
                player_id,
                auth_code,
                dead_primary,
            } => {
                if let Some(server) = self.backup_server().await {
                    match server
                        .primary_died(caller, &player_id, &auth_code, dead_primary)
                        .await
                    {
                        Some(reply) => Response::Ping(reply),
                        None => Response::Denied,
                    }
                } else if let Some(server) = self.primary_server().await {
                    // This peer was the backup and has already promoted
                    // itself. Answer like a heartbeat so the reporter learns
                    // the new regime (and may be recruited as the backup).
                    match server.ping(caller, &player_id, &auth_code).await {
                        Some(reply) => Response::Ping(reply),
                        None => Response::Denied,
                    }
                } else {
                    self.deny("death report")
                }
            }
            Request::GameStarted { snapshot } => {
                self.client.lock().await.game_started(snapshot);
                Response::Ack
            }
        }
    }

    fn deny(&self, kind: &str) -> Response {
        warn!("denying {kind} request: this peer does not hold that role");
        Response::Denied
    }

    /// Applies a promotion directive carried in a server reply, then feeds
    /// the snapshot to the client role.
    pub async fn process_reply(
        &self,
        promotion: Promotion,
        snapshot: GameState,
        secrets: Option<ServerSecrets>,
    ) {
        match promotion {
            Promotion::None => {
                self.client.lock().await.observe(snapshot);
            }
            Promotion::ToBackup => {
                let Some(creds) = self.client.lock().await.credentials() else {
                    warn!("backup promotion before enrollment; ignoring");
                    return;
                };
                let Some(secrets) = secrets else {
                    warn!("backup promotion carried no secrets; ignoring");
                    return;
                };
                info!("assuming the backup role");
                let server = Arc::new(BackupServer::new(
                    self.handle,
                    creds.player_id,
                    creds.auth_code,
                    snapshot.clone(),
                    secrets,
                    self.config.clone(),
                ));
                *self.role.lock().await = ServerRole::Backup { server };
                self.client.lock().await.observe(snapshot);
            }
            Promotion::ToPrimary => {
                let Some(creds) = self.client.lock().await.credentials() else {
                    warn!("primary promotion before enrollment; ignoring");
                    return;
                };
                let Some(secrets) = secrets else {
                    warn!("primary promotion carried no secrets; ignoring");
                    return;
                };
                info!("assuming the primary role");
                let server = Arc::new(PrimaryServer::inherit(
                    self.handle,
                    creds.player_id,
                    snapshot,
                    secrets,
                    self.config.clone(),
                ));
                let timers = vec![server.start_sweep()];
                // `inherit` rewrites the server config, so observe its copy.
                let snapshot = server.snapshot().await;
                *self.role.lock().await = ServerRole::Primary {
                    server,
                    _timers: timers,
                };
                self.client.lock().await.observe(snapshot);
            }
        }
    }

    /// Submits one movement intent to the believed primary. On failure the
    /// node reports the death to the believed backup and returns the error;
    /// the caller decides whether to retry against the new regime.
    pub async fn submit_move(&self, direction: Direction) -> Result<MoveReply, RpcError> {
        let (creds, primary, backup) = {
            let client = self.client.lock().await;
            (
                client.credentials(),
                client.believed_primary(),
                client.believed_backup(),
            )
        };
        let Some(creds) = creds else {
            return Err(RpcError::Protocol("not enrolled in a game".to_string()));
        };
        let Some(primary) = primary else {
            return Err(RpcError::Unreachable("no known primary".to_string()));
        };

        let request = Request::Move {
            caller: self.handle,
            direction,
            player_id: creds.player_id.clone(),
            auth_code: creds.auth_code.clone(),
        };
        // The move embeds the replication push, so allow for one nested call.
        match network::call(primary.0, &request, self.config.rpc_timeout * 2).await {
            Ok(Response::Move(reply)) => {
                self.process_reply(reply.promotion, reply.snapshot.clone(), reply.secrets.clone())
                    .await;
                Ok(reply)
            }
            Ok(Response::Denied) => Err(RpcError::Protocol(
                "move denied by believed primary".to_string(),
            )),
            Ok(other) => Err(RpcError::Protocol(format!(
                "unexpected move response: {other:?}"
            ))),
            Err(e) => {
                warn!("primary {primary} unreachable during move: {e}");
                client::report_primary_death(self, &creds, primary, backup).await;
                Err(e)
            }
        }
    }
}
