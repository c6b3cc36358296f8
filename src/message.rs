use bytes::Bytes;

/// Quality of Service levels
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum QoS {
    /// At most once delivery
    ///
    /// The message is delivered according to the capabilities of the
    /// underlying network. No response is sent by the receiver and no retry
    /// is performed by the sender.
    AtMostOnce = 0,

    /// At least once delivery
    ///
    /// A QoS 1 PUBLISH Packet has a Packet Identifier in its variable header
    /// and is acknowledged by a PUBACK Packet.
    AtLeastOnce = 1,

    /// Exactly once delivery
    ///
    /// The highest quality of service, for use when neither loss nor
    /// duplication of messages are acceptable.
    ExactlyOnce = 2,
}

impl Default for QoS {
    fn default() -> Self {
        QoS::AtMostOnce
    }
}

/// An application message to publish.
///
/// QoS 1/2 messages are stashed in this form until the broker acknowledges
/// them, so a resumed session can retransmit them with the dup flag set.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishMessage {
    /// The information channel to which payload data is published.
    pub topic: String,
    /// The Application Message that is being published.
    pub payload: Bytes,
    pub qos: QoS,
    /// If set, the Server MUST store the Application Message so that it can
    /// be delivered to future subscribers.
    pub retain: bool,
    /// Marks this PUBLISH as a possible re-delivery of an earlier attempt.
    pub dup: bool,
}

/// An incoming PUBLISH as handed to the application callback.
///
/// Topic and payload borrow from the codec's receive buffer and are only
/// valid for the duration of the callback.
#[derive(Clone, Copy, Debug)]
pub struct ReceivedPublish<'a> {
    pub packet_id: u16,
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

/// A single topic filter in a SUBSCRIBE or UNSUBSCRIBE request.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// Topic Filter indicating the Topics to which the Client wants to
    /// subscribe.
    pub topic: String,
    /// Maximum QoS requested for the subscription.
    pub qos: QoS,
    /// The QoS granted by the broker, filled in by a successful `subscribe`;
    /// `None` when the broker rejected this filter.
    pub allocated_qos: Option<QoS>,
}

impl Subscription {
    pub fn new<T: Into<String>>(topic: T, qos: QoS) -> Self {
        Subscription {
            topic: topic.into(),
            qos,
            allocated_qos: None,
        }
    }
}

impl<'a> From<(&'a str, QoS)> for Subscription {
    fn from((topic, qos): (&'a str, QoS)) -> Subscription {
        Subscription::new(topic, qos)
    }
}

/// Connection Will
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LastWill<'a> {
    /// The QoS level to be used when publishing the Will Message.
    pub qos: QoS,
    /// Whether the Will Message is to be retained when it is published.
    pub retain: bool,
    /// The Will Topic.
    pub topic: &'a str,
    /// The Application Message that is to be published to the Will Topic.
    pub payload: &'a [u8],
}

/// Parameters of the MQTT CONNECT handshake.
#[derive(Clone, Copy, Debug)]
pub struct ConnectOptions<'a> {
    /// Identifies the Client to the Server.
    pub client_id: &'a str,
    /// Keep-alive interval, in seconds. Zero disables the keep-alive
    /// mechanism.
    pub keep_alive_sec: u16,
    /// Ask the broker to discard any prior session state for this client id.
    pub clean_session: bool,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    pub will: Option<LastWill<'a>>,
}

/// Why the session went away underneath the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The broker stopped answering (keep-alive timeout or a broken ping
    /// exchange).
    BrokerDown,
    /// The transport reported the network connection gone.
    NetworkDown,
}

/// Events delivered to the application callback.
#[derive(Debug)]
pub enum Event<'a> {
    PublishReceived(ReceivedPublish<'a>),
    Disconnected(DisconnectReason),
}

/// Application upcall, invoked from whichever thread is driving the codec
/// process loop at the time.
///
/// The callback runs with the client's state lock held: it must not call
/// back into `publish`, `subscribe` or `unsubscribe` on the same client.
pub type EventCallback = Box<dyn Fn(Event<'_>) + Send + Sync>;
