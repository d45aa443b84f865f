//! Loopback notification handlers driven through a running component.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    pusher_component::{ComponentSettings, PusherComponent, TrafficClass, transport},
    pusher_handlers::{
        HandlerDeps, InMemorySettingsStore, Notification, NotificationSender, NotificationSettings,
        SettingsStore, handler_tables,
    },
    pusher_protocol::{
        ErrorType, Iq, IqType, Message, Query, Stanza, StanzaError, conditions,
        events::{DeleteUserEvent, FollowEvent, PostEvent},
        ns,
        pubsub::{
            Affiliation, AffiliationsPage, EventKind, Item, ItemsPage, ItemsQuery, PubsubEvent,
            SubscriptionState, roles,
        },
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
};

const CHANNEL: &str = "alice@example.com";
const NODE: &str = "/user/alice@example.com/posts";

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSender {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationSender for RecordingSender {
    fn push(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

struct Setup {
    component: PusherComponent,
    inbound: mpsc::UnboundedSender<Stanza>,
    /// Replies the component sent to requests injected by the test.
    replies: mpsc::UnboundedReceiver<Iq>,
    store: Arc<InMemorySettingsStore>,
    sender: Arc<RecordingSender>,
    _cancel: tokio_util::sync::DropGuard,
}

/// Channel server with a fixed affiliation list for [`NODE`] and one
/// earlier post `p1` by alice. Also plays the user server for password
/// changes, refusing any for `mallory`.
fn serve(iq: &Iq) -> Iq {
    let query = iq.query.as_ref().unwrap();
    if query.xmlns == ns::REGISTER {
        if query.text("username") == Some("mallory") {
            return iq.error_reply(StanzaError::new(ErrorType::Cancel, "not-allowed", "no"));
        }
        return iq.result(None);
    }
    if query.xmlns == ns::PUBSUB_OWNER {
        let page = AffiliationsPage {
            affiliations: vec![
                Affiliation::new("alice@example.com", roles::OWNER),
                Affiliation::new("dave@example.com", roles::MEMBER),
                Affiliation::new("bob@example.com", roles::PUBLISHER),
                Affiliation::new("erin@example.com", roles::MODERATOR),
            ],
            set: None,
        };
        return iq.result(Some(Query::from_payload(ns::PUBSUB_OWNER, &page).unwrap()));
    }
    let request: ItemsQuery = query.parse().unwrap();
    let items = request
        .item_ids
        .iter()
        .filter(|id| id.as_str() == "p1")
        .map(|id| Item {
            id: id.clone(),
            author: "alice@example.com".into(),
            content: "first".into(),
            in_reply_to: None,
        })
        .collect();
    iq.result(Some(Query::from_payload(ns::PUBSUB, &ItemsPage { items }).unwrap()))
}

async fn registered(store: &InMemorySettingsStore, jid: &str, edit: impl FnOnce(&mut NotificationSettings)) {
    let mut settings = NotificationSettings::new(jid);
    settings.email = Some(format!("{}@mail.example.com", jid.split('@').next().unwrap()));
    edit(&mut settings);
    store.upsert(settings).await.unwrap();
}

fn setup() -> Setup {
    let (sink, mut outbound) = transport::channel();
    let builder = PusherComponent::builder(
        ComponentSettings {
            jid: "pusher.example.com".into(),
            channel_server: "channels.example.com".into(),
            reply_timeout: Duration::from_secs(5),
        },
        Arc::new(sink),
    );

    let store = Arc::new(InMemorySettingsStore::new());
    let sender = Arc::new(RecordingSender::default());
    let deps = HandlerDeps {
        store: store.clone(),
        sender: sender.clone(),
        pubsub: builder.pubsub(),
        from_address: "pusher@example.com".into(),
    };
    let component = builder.finish(handler_tables(&deps).unwrap());

    let (inbound, inbound_rx) = mpsc::unbounded_channel();
    let (replies_tx, replies) = mpsc::unbounded_channel();
    let server_inbound = inbound.clone();
    tokio::spawn(async move {
        while let Some(stanza) = outbound.recv().await {
            let Stanza::Iq(iq) = stanza else { continue };
            if iq.iq_type.is_request() {
                let _ = server_inbound.send(Stanza::Iq(serve(&iq)));
            } else {
                let _ = replies_tx.send(iq);
            }
        }
    });

    let cancel = CancellationToken::new();
    {
        let component = component.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            component
                .run(transport::receiver_stream(inbound_rx), cancel)
                .await
        });
    }

    Setup {
        component,
        inbound,
        replies,
        store,
        sender,
        _cancel: cancel.drop_guard(),
    }
}

fn loopback(namespace: &str, payload: &impl serde::Serialize) -> Iq {
    let mut iq = Iq::set("pusher.example.com", Query::from_payload(namespace, payload).unwrap());
    iq.id = "lb-1".into();
    iq
}

async fn wait_for(sender: &RecordingSender, count: usize) -> Vec<Notification> {
    for _ in 0..200 {
        let sent = sender.sent();
        if sent.len() >= count {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} notifications, got {:?}", sender.sent());
}

#[tokio::test]
async fn tables_cover_every_namespace() {
    let s = setup();
    let tables = handler_tables(&HandlerDeps {
        store: s.store.clone(),
        sender: s.sender.clone(),
        pubsub: s.component.pubsub().clone(),
        from_address: "pusher@example.com".into(),
    })
    .unwrap();

    assert_eq!(tables.table(TrafficClass::Get).namespaces(), vec![
        ns::METADATA,
        ns::NOTIFICATION_SETTINGS
    ]);
    assert_eq!(tables.table(TrafficClass::Set).namespaces(), vec![
        ns::NOTIFICATION_SETTINGS,
        ns::PASSWORD_RESET,
        ns::SIGNUP,
        ns::UNREGISTER,
    ]);
    let loopback = tables.table(TrafficClass::Loopback);
    assert_eq!(loopback.len(), 10);
    for namespace in [
        ns::FOLLOW_REQUEST,
        ns::FOLLOW_REQUEST_APPROVED,
        ns::FOLLOW_REQUEST_DENIED,
        ns::DELETE_USER,
        ns::USER_FOLLOWED,
        ns::USER_UNFOLLOWED,
        ns::USER_POSTED_AFTER_MY_POST,
        ns::USER_POSTED_MENTION,
        ns::USER_POSTED_ON_MY_CHANNEL,
        ns::USER_POSTED_ON_SUBSCRIBED_CHANNEL,
    ] {
        assert!(loopback.lookup(namespace).is_some(), "{namespace} missing");
    }
}

fn subscription(jid: &str, subscription: SubscriptionState) -> Stanza {
    Stanza::Message(Message {
        from: Some("channels.example.com".into()),
        to: Some("pusher.example.com".into()),
        event: Some(PubsubEvent {
            node: NODE.into(),
            kind: EventKind::Subscription {
                jid: jid.into(),
                subscription,
            },
        }),
    })
}

#[tokio::test]
async fn approved_follow_request_tells_the_requester() {
    let s = setup();
    registered(&s.store, "bob@example.com", |_| {}).await;

    s.inbound
        .send(subscription("bob@example.com", SubscriptionState::Pending))
        .unwrap();
    // Owners are not registered, so the request itself notifies nobody.
    tokio::time::sleep(Duration::from_millis(50)).await;
    s.inbound
        .send(subscription("bob@example.com", SubscriptionState::Subscribed))
        .unwrap();

    let sent = wait_for(&s.sender, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(s.sender.sent().len(), 1);
    assert_eq!(sent[0].template, "followrequest-approved");
    assert_eq!(sent[0].to, "bob@mail.example.com");
    assert_eq!(sent[0].tokens["CHANNEL_JID"], CHANNEL);
}

#[tokio::test]
async fn denied_follow_request_tells_the_requester() {
    let s = setup();
    registered(&s.store, "bob@example.com", |_| {}).await;

    let reply = s
        .component
        .handle_loopback(loopback(ns::FOLLOW_REQUEST_DENIED, &FollowEvent {
            user_jid: "bob@example.com/web".into(),
            channel: CHANNEL.into(),
        }))
        .await;
    assert_eq!(reply.iq_type, IqType::Result);

    let sent = s.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "followrequest-denied");
    assert_eq!(sent[0].to, "bob@mail.example.com");
    assert_eq!(sent[0].tokens["FIRST_PART_JID"], "bob");
}

#[tokio::test]
async fn denied_follow_request_respects_settings() {
    let s = setup();
    registered(&s.store, "bob@example.com", |n| n.follow_request = false).await;

    s.component
        .handle_loopback(loopback(ns::FOLLOW_REQUEST_DENIED, &FollowEvent {
            user_jid: "bob@example.com".into(),
            channel: CHANNEL.into(),
        }))
        .await;
    assert!(s.sender.sent().is_empty());
}

async fn password_reset(s: &mut Setup, username: &str) -> Iq {
    let mut iq = Iq::set(
        "pusher.example.com",
        Query::new(ns::PASSWORD_RESET, serde_json::json!({ "username": username })),
    );
    iq.id = "reset-1".into();
    iq.from = Some("anonymous@example.com/web".into());
    s.inbound.send(Stanza::Iq(iq)).unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), s.replies.recv())
        .await
        .expect("no reply")
        .unwrap();
    assert_eq!(reply.id, "reset-1");
    reply
}

#[tokio::test]
async fn password_reset_changes_password_and_mails_it() {
    let mut s = setup();
    registered(&s.store, "bob@example.com", |_| {}).await;

    let reply = password_reset(&mut s, "bob@example.com").await;
    assert_eq!(reply.iq_type, IqType::Result, "{reply:?}");

    let sent = s.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "password-reset");
    assert_eq!(sent[0].to, "bob@mail.example.com");
    let password = &sent[0].tokens["NEW_PASSWORD"];
    assert_eq!(password.len(), 10);
    assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[tokio::test]
async fn password_reset_for_unknown_user_is_item_not_found() {
    let mut s = setup();
    let reply = password_reset(&mut s, "nobody@example.com").await;
    assert_eq!(reply.iq_type, IqType::Error);
    assert_eq!(reply.error.unwrap().condition, conditions::ITEM_NOT_FOUND);
    assert!(s.sender.sent().is_empty());
}

#[tokio::test]
async fn refused_password_change_sends_no_mail() {
    let mut s = setup();
    registered(&s.store, "mallory@example.com", |_| {}).await;

    let reply = password_reset(&mut s, "mallory@example.com").await;
    assert_eq!(reply.iq_type, IqType::Error);
    assert_eq!(
        reply.error.unwrap().condition,
        conditions::INTERNAL_SERVER_ERROR
    );
    assert!(s.sender.sent().is_empty());
}

#[tokio::test]
async fn follow_notifies_owners_who_opted_in() {
    let s = setup();
    registered(&s.store, "alice@example.com", |_| {}).await;

    let reply = s
        .component
        .handle_loopback(loopback(ns::USER_FOLLOWED, &FollowEvent {
            user_jid: "bob@example.com".into(),
            channel: CHANNEL.into(),
        }))
        .await;
    assert_eq!(reply.iq_type, IqType::Result);

    let sent = s.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "userfollowed");
    assert_eq!(sent[0].to, "alice@mail.example.com");
    assert_eq!(sent[0].tokens["FIRST_PART_JID"], "bob");
    assert_eq!(sent[0].tokens["CHANNEL_JID"], CHANNEL);
}

#[tokio::test]
async fn follow_request_reaches_moderators_and_respects_settings() {
    let s = setup();
    registered(&s.store, "alice@example.com", |n| n.follow_request = false).await;
    registered(&s.store, "erin@example.com", |_| {}).await;

    s.component
        .handle_loopback(loopback(ns::FOLLOW_REQUEST, &FollowEvent {
            user_jid: "bob@example.com".into(),
            channel: CHANNEL.into(),
        }))
        .await;

    let sent = s.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "erin@mail.example.com");
    assert_eq!(sent[0].template, "follow-request");
}

#[tokio::test]
async fn named_event_without_recipient_is_bad_request() {
    let s = setup();
    let reply = s
        .component
        .handle_loopback(loopback(ns::USER_POSTED_MENTION, &PostEvent {
            user_jid: "bob@example.com".into(),
            channel: CHANNEL.into(),
            post_content: "hello".into(),
            recipient_jid: None,
        }))
        .await;
    assert_eq!(reply.iq_type, IqType::Error);
    assert_eq!(reply.error.unwrap().condition, conditions::BAD_REQUEST);
    assert!(s.sender.sent().is_empty());
}

#[tokio::test]
async fn unregistered_recipient_is_skipped() {
    let s = setup();
    let reply = s
        .component
        .handle_loopback(loopback(ns::USER_POSTED_AFTER_MY_POST, &PostEvent {
            user_jid: "bob@example.com".into(),
            channel: CHANNEL.into(),
            post_content: "reply".into(),
            recipient_jid: Some("nobody@example.com".into()),
        }))
        .await;
    assert_eq!(reply.iq_type, IqType::Result);
    assert!(s.sender.sent().is_empty());
}

#[tokio::test]
async fn delete_user_drops_settings() {
    let s = setup();
    registered(&s.store, "dave@example.com", |_| {}).await;

    let reply = s
        .component
        .handle_loopback(loopback(ns::DELETE_USER, &DeleteUserEvent {
            user_jid: "dave@example.com/phone".into(),
        }))
        .await;
    assert_eq!(reply.iq_type, IqType::Result);
    assert!(s.store.get("dave@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn published_item_fans_out_to_every_interested_user() {
    let s = setup();
    registered(&s.store, "alice@example.com", |_| {}).await;
    registered(&s.store, "carol@example.com", |_| {}).await;
    registered(&s.store, "dave@example.com", |n| n.post_on_subscribed_channel = true).await;
    // Moderator without opt-in gets nothing for subscribed-channel posts.
    registered(&s.store, "erin@example.com", |_| {}).await;

    s.inbound
        .send(Stanza::Message(Message {
            from: Some("channels.example.com".into()),
            to: Some("pusher.example.com".into()),
            event: Some(PubsubEvent {
                node: NODE.into(),
                kind: EventKind::Items {
                    items: vec![Item {
                        id: "p2".into(),
                        author: "bob@example.com".into(),
                        content: "agreed @carol@example.com".into(),
                        in_reply_to: Some("p1".into()),
                    }],
                },
            }),
        }))
        .unwrap();

    let sent = wait_for(&s.sender, 4).await;
    // Give stray extra notifications a moment to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(s.sender.sent().len(), 4);

    let got: BTreeSet<_> = sent
        .iter()
        .map(|n| (n.template.as_str(), n.to.as_str()))
        .collect();
    let want: BTreeSet<_> = [
        ("userposted-onmychannel", "alice@mail.example.com"),
        ("userposted-mention", "carol@mail.example.com"),
        ("userposted-aftermypost", "alice@mail.example.com"),
        ("userposted-onsubscribedchannel", "dave@mail.example.com"),
    ]
    .into_iter()
    .collect();
    assert_eq!(got, want);
    assert!(sent.iter().all(|n| n.tokens["CONTENT"] == "agreed @carol@example.com"));
}
