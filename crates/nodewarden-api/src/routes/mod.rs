pub mod clients;
pub mod server;

use nodewarden_node::clients::ClientManager;
use nodewarden_node::exec::HostRunner;
use nodewarden_node::server::ServerService;

pub type NodeManager = ClientManager<HostRunner>;
pub type NodeServer = ServerService<HostRunner>;
