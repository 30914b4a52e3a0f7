//! End-to-end checks against running nodes: the scenarios here cross
//! the real wire (HTTP exchanges, raw WebSocket bytes) instead of
//! calling into crate internals.

fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use sharemesh_node::{Node, NodeConfig};
    use sharemesh_protocol::ServiceMessage;
    use sharemesh_protocol::constants::Service;
    use sharemesh_protocol::messages::{
        CopyMessage, CopyRequest, FileAction, FileRequest, FileStatus,
    };
    use sharemesh_protocol::types::{ActivityStatus, AddressList, Agent, AgentClass, AgentRef};
    use sharemesh_transport::{NodeClient, NodeIdentity};
    use sharemesh_websocket::Opcode;
    use sharemesh_websocket::frame::{self, Frame};

    async fn boot(root: &std::path::Path, name: &str) -> Arc<Node> {
        let mut config = NodeConfig::default();
        config.device_name = name.into();
        config.user_name = format!("{name}-owner");
        config.listen = "127.0.0.1".into();
        config.ports.http = 0;
        config.ports.ws = 0;
        config.storage = root.join(name).join("storage");
        Node::start(config, false).await.unwrap()
    }

    /// Puts `known` into `node`'s directory, reachable on loopback.
    fn introduce(node: &Node, known: &Node) {
        node.directory
            .insert(
                AgentClass::Device,
                &known.identity.hash_device,
                Agent {
                    ip_all: AddressList::default(),
                    ip_selected: "127.0.0.1".into(),
                    name: known.identity.name_device.clone(),
                    ports: known.ports(),
                    shares: HashMap::new(),
                    status: ActivityStatus::Active,
                },
            )
            .unwrap();
    }

    fn client_for(node: &Node) -> NodeClient {
        NodeClient::new(NodeIdentity {
            hash_device: node.identity.hash_device.clone(),
            hash_user: node.identity.hash_user.clone(),
            name_device: node.identity.name_device.clone(),
            name_user: node.identity.name_user.clone(),
        })
        .unwrap()
    }

    fn device_ref(node: &Node, address: &str) -> AgentRef {
        AgentRef {
            id: node.identity.hash_device.clone(),
            address: address.to_string(),
            share: String::new(),
            class: AgentClass::Device,
        }
    }

    fn loopback(port: u16) -> String {
        format!("127.0.0.1:{port}")
    }

    // ---- file-system over HTTP ----

    #[tokio::test]
    async fn fs_new_answers_created() {
        let root = tempfile::tempdir().unwrap();
        let node = boot(root.path(), "solo").await;
        let target = root.path().join("x");

        let request = FileRequest {
            action: FileAction::FsNew,
            agent: device_ref(&node, ""),
            depth: 0,
            id: "1".into(),
            location: vec![target.display().to_string()],
            name: "directory".into(),
            watch: None,
        };
        let message = ServiceMessage::new(Service::FileSystem, &request).unwrap();
        let reply = client_for(&node)
            .send(&loopback(node.ports().http), AgentClass::Device, &message)
            .await
            .unwrap();

        let status: FileStatus = serde_json::from_str(&reply).unwrap();
        assert_eq!(status.message, format!("{} created.", target.display()));
        assert_eq!(status.failures, 0);
        assert!(target.is_dir());
        node.shutdown().await;
    }

    // ---- two-node copy and cut ----

    fn seed_bundle(root: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let bundle = root.join("outbox").join("bundle");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("alpha.txt"), b"alpha lives here").unwrap();
        std::fs::write(bundle.join("beta.txt"), vec![0x42u8; 2048]).unwrap();
        std::fs::write(bundle.join("gamma.txt"), b"third of three").unwrap();
        let dest = root.join("inbox");
        std::fs::create_dir_all(&dest).unwrap();
        (bundle, dest)
    }

    fn assert_landed(dest: &std::path::Path) {
        let landed = dest.join("bundle");
        assert!(landed.is_dir(), "destination directory never created");
        assert_eq!(
            std::fs::read(landed.join("alpha.txt")).unwrap(),
            b"alpha lives here"
        );
        assert_eq!(
            std::fs::read(landed.join("beta.txt")).unwrap(),
            vec![0x42u8; 2048]
        );
        assert_eq!(
            std::fs::read(landed.join("gamma.txt")).unwrap(),
            b"third of three"
        );
    }

    #[tokio::test]
    async fn two_node_copy_moves_a_directory() {
        let root = tempfile::tempdir().unwrap();
        let source = boot(root.path(), "source").await;
        let write = boot(root.path(), "write").await;
        introduce(&source, &write);
        introduce(&write, &source);

        let (bundle, dest) = seed_bundle(root.path());
        let request = CopyRequest {
            agent_source: device_ref(&source, &bundle.parent().unwrap().display().to_string()),
            agent_write: device_ref(&write, &dest.display().to_string()),
            cut: false,
            location: vec![bundle.display().to_string()],
        };
        let message = ServiceMessage::new(Service::Copy, &CopyMessage::Copy(request)).unwrap();
        let reply = client_for(&source)
            .send(&loopback(source.ports().http), AgentClass::Device, &message)
            .await
            .unwrap();

        let status: FileStatus = serde_json::from_str(&reply).unwrap();
        assert_eq!(status.failures, 0, "final status: {}", status.message);
        assert!(
            status.message.contains("3 files written"),
            "final status: {}",
            status.message
        );
        assert!(status.message.contains("0 integrity failures"));

        assert_landed(&dest);
        // A plain copy leaves the source alone.
        assert!(bundle.join("alpha.txt").exists());

        source.shutdown().await;
        write.shutdown().await;
    }

    #[tokio::test]
    async fn two_node_cut_removes_the_source() {
        let root = tempfile::tempdir().unwrap();
        let source = boot(root.path(), "source").await;
        let write = boot(root.path(), "write").await;
        introduce(&source, &write);
        introduce(&write, &source);

        let (bundle, dest) = seed_bundle(root.path());
        let request = CopyRequest {
            agent_source: device_ref(&source, &bundle.parent().unwrap().display().to_string()),
            agent_write: device_ref(&write, &dest.display().to_string()),
            cut: true,
            location: vec![bundle.display().to_string()],
        };
        let message = ServiceMessage::new(Service::Copy, &CopyMessage::Copy(request)).unwrap();
        let reply = client_for(&source)
            .send(&loopback(source.ports().http), AgentClass::Device, &message)
            .await
            .unwrap();

        let status: FileStatus = serde_json::from_str(&reply).unwrap();
        assert_eq!(status.failures, 0, "final status: {}", status.message);
        assert_landed(&dest);
        // A clean cut removes the whole selection at the source.
        assert!(!bundle.exists());

        source.shutdown().await;
        write.shutdown().await;
    }

    // ---- raw socket surface ----

    /// Opens a raw TCP connection and runs the browser-harness
    /// handshake byte by byte, so the assertions cover the literal
    /// HTTP text.
    async fn raw_socket(node: &Node) -> TcpStream {
        let mut stream = TcpStream::connect(("127.0.0.1", node.ports().ws))
            .await
            .unwrap();
        let request = "GET / HTTP/1.1\r\n\
                       Host: sharemesh\r\n\
                       Upgrade: websocket\r\n\
                       Connection: Upgrade\r\n\
                       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                       Sec-WebSocket-Version: 13\r\n\
                       Sec-WebSocket-Protocol: test-browser\r\n\r\n";
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            response.push(byte[0]);
        }
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 101"), "got {text:?}");
        // Accept digest for the RFC 6455 sample key.
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        stream
    }

    #[tokio::test]
    async fn unknown_service_is_destroyed_unanswered() {
        let root = tempfile::tempdir().unwrap();
        let node = boot(root.path(), "strict").await;
        let mut stream = raw_socket(&node).await;

        let payload = br#"{"service":"bogus","data":{}}"#.to_vec();
        frame::write_frame(
            &mut stream,
            &Frame::message(Opcode::Text, payload),
            Some([0x11, 0x22, 0x33, 0x44]),
        )
        .await
        .unwrap();

        // No close frame, no error text: the stream just ends.
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "expected silence, got {} bytes", rest.len());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn ping_earns_one_pong_and_nothing_else() {
        let root = tempfile::tempdir().unwrap();
        let node = boot(root.path(), "ponger").await;
        let mut stream = raw_socket(&node).await;

        // Envelope-shaped payload: a ping must never reach dispatch.
        let payload = br#"{"service":"test-browser","data":{"action":"x","index":1}}"#.to_vec();
        frame::write_frame(
            &mut stream,
            &Frame::message(Opcode::Ping, payload.clone()),
            Some([0xaa, 0xbb, 0xcc, 0xdd]),
        )
        .await
        .unwrap();

        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await.unwrap();
        assert_eq!(head[0], 0x8a, "expected a final pong frame");
        assert_eq!(head[1] as usize, payload.len(), "unmasked single-byte length");
        let mut echoed = vec![0u8; payload.len()];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, payload);

        // A 126-byte ping moves the length into the 16-bit tier.
        let long = vec![0x55u8; 126];
        frame::write_frame(
            &mut stream,
            &Frame::message(Opcode::Ping, long.clone()),
            Some([0x01, 0x02, 0x03, 0x04]),
        )
        .await
        .unwrap();
        let mut extended = [0u8; 4];
        stream.read_exact(&mut extended).await.unwrap();
        assert_eq!(extended, [0x8a, 126, 0x00, 0x7e]);
        let mut body = vec![0u8; 126];
        stream.read_exact(&mut body).await.unwrap();
        assert_eq!(body, long);

        // And that is all: no text reply ever follows a ping.
        let mut one = [0u8; 1];
        let extra =
            tokio::time::timeout(Duration::from_millis(300), stream.read_exact(&mut one)).await;
        assert!(extra.is_err(), "unexpected bytes after the pongs");
        node.shutdown().await;
    }
}
