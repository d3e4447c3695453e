use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use marketplace_chat::common::{ClientCommand, JoinRoomParams, Role, ServerEvent, UserProfile};
use marketplace_chat::identity::Identity;
use marketplace_chat::presence::{EventReceiver, PresenceRouter};
use marketplace_chat::session::Session;
use marketplace_chat::storage::ChatStore;
use marketplace_chat::ChatService;

fn service() -> Arc<ChatService> {
    Arc::new(ChatService::new(
        ChatStore::in_memory().unwrap(),
        Arc::new(PresenceRouter::new()),
    ))
}

fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn join_pair(buyer: &str, seller: &str, role: Role) -> ClientCommand {
    ClientCommand::JoinRoom(JoinRoomParams {
        room_id: None,
        user_id: Some(buyer.into()),
        seller_id: Some(seller.into()),
        role: Some(role),
    })
}

fn join_id(room_id: &str) -> ClientCommand {
    ClientCommand::JoinRoom(JoinRoomParams {
        room_id: Some(room_id.into()),
        ..Default::default()
    })
}

#[tokio::test]
async fn seller_cannot_open_a_new_conversation() {
    let service = service();
    let (mut seller, mut rx) = Session::open(
        Arc::clone(&service),
        Some(Identity::new("s").with_role(Role::Seller)),
    )
    .await;

    seller.handle(join_pair("b", "s", Role::Seller)).await;

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], ServerEvent::Error { .. }));
    assert!(service.store().list_chats("s", Role::Seller).await.unwrap().is_empty());
    assert!(
        service
            .store()
            .resolve_or_create("b", "s", Some(Role::Seller))
            .await
            .is_err(),
        "no room may exist for the pair"
    );
}

#[tokio::test]
async fn seller_cannot_open_a_conversation_by_claiming_the_buyer_role() {
    let service = service();
    let (mut seller, mut rx) = Session::open(
        Arc::clone(&service),
        Some(Identity::new("s").with_role(Role::Seller)),
    )
    .await;

    seller.handle(join_pair("b", "s", Role::Buyer)).await;

    assert_eq!(
        drain(&mut rx),
        vec![ServerEvent::error(
            "Chat room does not exist. Only buyers can initiate chat."
        )]
    );
    assert!(seller.joined_rooms().is_empty());
    assert!(
        service
            .store()
            .resolve_or_create("b", "s", Some(Role::Seller))
            .await
            .is_err(),
        "no room may exist for the pair"
    );

    // once the buyer opens it, the same request joins the existing room
    let (mut buyer, _buyer_rx) = Session::open(
        Arc::clone(&service),
        Some(Identity::new("b").with_role(Role::Buyer)),
    )
    .await;
    buyer.handle(join_pair("b", "s", Role::Buyer)).await;
    seller.handle(join_pair("b", "s", Role::Buyer)).await;
    assert_eq!(seller.joined_rooms(), buyer.joined_rooms());
    assert_eq!(seller.joined_rooms().len(), 1);
}

#[tokio::test]
async fn buyer_opens_chat_and_seller_reads_it() {
    let service = service();
    service
        .store()
        .upsert_user(
            UserProfile {
                id: "b".into(),
                name: "Bea".into(),
            },
            Some(Role::Buyer),
        )
        .await
        .unwrap();

    let (mut buyer, mut buyer_rx) = Session::open(
        Arc::clone(&service),
        Some(Identity::new("b").with_role(Role::Buyer)),
    )
    .await;
    let (mut seller, mut seller_rx) = Session::open(
        Arc::clone(&service),
        Some(Identity::new("s").with_role(Role::Seller)),
    )
    .await;

    buyer.handle(join_pair("b", "s", Role::Buyer)).await;
    let events = drain(&mut buyer_rx);
    let room_id = match events.as_slice() {
        [ServerEvent::ChatHistory(history), ServerEvent::RoomJoined { room_id }] => {
            assert!(history.is_empty());
            room_id.clone()
        }
        other => panic!("unexpected join events: {other:?}"),
    };

    buyer
        .handle(ClientCommand::SendMessage {
            room_id: room_id.clone(),
            sender_id: "b".into(),
            content: "hello".into(),
        })
        .await;

    // seller never joined the room but still hears about it through the user group
    let seller_events = drain(&mut seller_rx);
    assert_eq!(seller_events.len(), 1);
    let ServerEvent::ChatUpdated(summary) = &seller_events[0] else {
        panic!("expected chatUpdated, got {seller_events:?}");
    };
    assert_eq!(summary.id, room_id);
    assert_eq!(summary.latest_message, "hello");
    assert_eq!(summary.unread.value(), 1);
    assert_eq!(summary.other_party.as_ref().unwrap().name, "Bea");

    let buyer_events = drain(&mut buyer_rx);
    assert!(matches!(&buyer_events[0], ServerEvent::NewMessage(m) if m.username == "Bea"));
    assert!(
        matches!(&buyer_events[1], ServerEvent::ChatUpdated(s) if s.unread.value() == 0)
    );

    seller.handle(join_id(&room_id)).await;
    let events = drain(&mut seller_rx);
    let ServerEvent::ChatHistory(history) = &events[0] else {
        panic!("expected chatHistory first");
    };
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message.content, "hello");
    assert_eq!(history[0].user.as_ref().unwrap().name, "Bea");
    assert_eq!(
        events[1],
        ServerEvent::RoomJoined {
            room_id: room_id.clone()
        }
    );

    seller
        .handle(ClientCommand::MarkAsRead {
            room_id: room_id.clone(),
            user_id: "s".into(),
        })
        .await;
    let read = ServerEvent::MessagesRead {
        room_id: room_id.clone(),
        reader_id: "s".into(),
    };
    assert_eq!(drain(&mut buyer_rx), vec![read.clone()]);
    assert_eq!(drain(&mut seller_rx), vec![read]);
    assert_eq!(
        service
            .store()
            .unread_count_for(&room_id, "s")
            .await
            .unwrap()
            .value(),
        0
    );

    // idempotent
    assert_eq!(service.mark_as_read(Some("s"), &room_id, "s").await.unwrap(), 0);
}

#[tokio::test]
async fn eleven_unread_show_as_capped() {
    let service = service();
    let (room, _) = service
        .store()
        .resolve_or_create("b", "s", Some(Role::Buyer))
        .await
        .unwrap();
    let (_buyer, mut buyer_rx) = Session::open(Arc::clone(&service), Some(Identity::new("b"))).await;

    for i in 0..11 {
        service
            .send_message(None, &room.id, "s", &format!("offer {i}"))
            .await
            .unwrap();
    }

    let last = drain(&mut buyer_rx)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::ChatUpdated(summary) => Some(summary),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last.unread.value(), 11);
    assert_eq!(
        serde_json::to_value(&last).unwrap()["unread"],
        serde_json::json!("10+")
    );
    assert_eq!(
        service
            .store()
            .unread_count_for(&room.id, "b")
            .await
            .unwrap()
            .value(),
        11
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_are_seen_in_log_order() {
    let service = service();
    let (room, _) = service
        .store()
        .resolve_or_create("b", "s", Some(Role::Buyer))
        .await
        .unwrap();

    let mut observers = Vec::new();
    for _ in 0..3 {
        let (mut session, rx) = Session::open(Arc::clone(&service), None).await;
        session.handle(join_id(&room.id)).await;
        observers.push((session, rx));
    }
    for (_, rx) in observers.iter_mut() {
        drain(rx);
    }

    let senders = (0..20).map(|i| {
        let service = Arc::clone(&service);
        let room_id = room.id.clone();
        tokio::spawn(async move {
            let sender = if i % 2 == 0 { "b" } else { "s" };
            service
                .send_message(None, &room_id, sender, &format!("m{i}"))
                .await
                .unwrap();
        })
    });
    for handle in futures::future::join_all(senders).await {
        handle.unwrap();
    }

    let log: Vec<String> = service
        .store()
        .history(&room.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(log.len(), 20);

    for (_, rx) in observers.iter_mut() {
        let delivered: Vec<String> = drain(rx)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::NewMessage(m) => Some(m.id),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, log);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_create_one_room() {
    let service = service();
    let joins = (0..10).map(|_| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let (mut session, mut rx) = Session::open(
                service,
                Some(Identity::new("b").with_role(Role::Buyer)),
            )
            .await;
            session.handle(join_pair("b", "s", Role::Buyer)).await;
            drain(&mut rx)
                .into_iter()
                .find_map(|event| match event {
                    ServerEvent::RoomJoined { room_id } => Some(room_id),
                    _ => None,
                })
                .unwrap()
        })
    });

    let ids: Vec<String> = futures::future::join_all(joins)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert!(ids.iter().all(|id| id == &ids[0]));
}

#[tokio::test]
async fn errors_stay_with_the_originating_connection() {
    let service = service();
    let (room, _) = service
        .store()
        .resolve_or_create("b", "s", Some(Role::Buyer))
        .await
        .unwrap();

    let (mut buyer, mut buyer_rx) = Session::open(Arc::clone(&service), Some(Identity::new("b"))).await;
    let (mut seller, mut seller_rx) =
        Session::open(Arc::clone(&service), Some(Identity::new("s"))).await;
    buyer.handle(join_id(&room.id)).await;
    seller.handle(join_id(&room.id)).await;
    drain(&mut buyer_rx);
    drain(&mut seller_rx);

    buyer.handle(join_id("missing-room")).await;
    buyer
        .handle(ClientCommand::SendMessage {
            room_id: room.id.clone(),
            sender_id: "b".into(),
            content: "".into(),
        })
        .await;

    let buyer_events = drain(&mut buyer_rx);
    assert_eq!(
        buyer_events,
        vec![
            ServerEvent::error("Chat room does not exist"),
            ServerEvent::error("Message content cannot be empty"),
        ]
    );
    assert!(drain(&mut seller_rx).is_empty());

    // the session is still usable afterwards
    buyer
        .handle(ClientCommand::SendMessage {
            room_id: room.id.clone(),
            sender_id: "b".into(),
            content: "still here".into(),
        })
        .await;
    assert!(
        drain(&mut seller_rx)
            .iter()
            .any(|event| matches!(event, ServerEvent::NewMessage(m) if m.content == "still here"))
    );
}

#[tokio::test]
async fn history_returns_appended_message_last() {
    let service = service();
    let (room, _) = service
        .store()
        .resolve_or_create("b", "s", Some(Role::Buyer))
        .await
        .unwrap();
    service.send_message(None, &room.id, "s", "first").await.unwrap();
    let sent = service.send_message(None, &room.id, "b", "second").await.unwrap();

    let history = service.store().history(&room.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.id, sent.id);
    assert_eq!(last.content, "second");
    assert_eq!(last.sender_id, "b");
    assert_eq!(last.timestamp, sent.timestamp);
    assert!(!last.read);
}

#[tokio::test]
async fn send_completes_after_the_sender_session_is_gone() {
    let service = service();
    let (room, _) = service
        .store()
        .resolve_or_create("b", "s", Some(Role::Buyer))
        .await
        .unwrap();
    let (mut buyer, _buyer_rx) = Session::open(Arc::clone(&service), Some(Identity::new("b"))).await;
    let (mut seller, mut seller_rx) =
        Session::open(Arc::clone(&service), Some(Identity::new("s"))).await;
    seller.handle(join_id(&room.id)).await;
    drain(&mut seller_rx);

    // poll once so the command is dispatched, then abandon it and hang up
    let pending = buyer
        .handle(ClientCommand::SendMessage {
            room_id: room.id.clone(),
            sender_id: "b".into(),
            content: "gone".into(),
        })
        .now_or_never();
    assert!(pending.is_none());
    buyer.close();

    let mut received = Vec::new();
    while received.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), seller_rx.recv())
            .await
            .expect("timed out waiting for event")
            .unwrap();
        received.push(event);
    }
    assert!(matches!(&received[0], ServerEvent::NewMessage(m) if m.content == "gone"));
    assert!(matches!(&received[1], ServerEvent::ChatUpdated(s) if s.unread.value() == 1));

    let history = service.store().history(&room.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "gone");
}
