/// Wire messages for the Kraken WebSocket (v1) API.
///
/// Requests and event-tagged responses are JSON objects; channel data
/// arrives as positional JSON arrays with the channel name at the
/// second-to-last element. Field names are the server's wire protocol and
/// are kept bit-exact. Prices and volumes are decimal strings on the wire;
/// parsed events expose them as [`Decimal`], while request fields the
/// server interprets specially (`+<n>` relative times, `#<pct>` references,
/// RFC3339 deadlines) are forwarded verbatim as strings.
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Error;

// ---------------------------------------------------------------------------
// Request vocabulary
// ---------------------------------------------------------------------------

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type for add-order and close-order fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
    StopLossLimit,
    TakeProfitLimit,
    SettlePosition,
}

/// Time-in-force for add-order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[serde(rename = "GTC")]
    GoodTillCancelled,
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
    #[serde(rename = "GTD")]
    GoodTillDate,
}

/// Candle interval in minutes, restricted to the values the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum OhlcInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    FourHours,
    OneDay,
    OneWeek,
    FifteenDays,
}

impl OhlcInterval {
    pub fn minutes(self) -> u32 {
        match self {
            OhlcInterval::OneMinute => 1,
            OhlcInterval::FiveMinutes => 5,
            OhlcInterval::FifteenMinutes => 15,
            OhlcInterval::ThirtyMinutes => 30,
            OhlcInterval::OneHour => 60,
            OhlcInterval::FourHours => 240,
            OhlcInterval::OneDay => 1440,
            OhlcInterval::OneWeek => 10080,
            OhlcInterval::FifteenDays => 21600,
        }
    }
}

impl From<OhlcInterval> for u32 {
    fn from(interval: OhlcInterval) -> u32 {
        interval.minutes()
    }
}

impl TryFrom<u32> for OhlcInterval {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, String> {
        match minutes {
            1 => Ok(OhlcInterval::OneMinute),
            5 => Ok(OhlcInterval::FiveMinutes),
            15 => Ok(OhlcInterval::FifteenMinutes),
            30 => Ok(OhlcInterval::ThirtyMinutes),
            60 => Ok(OhlcInterval::OneHour),
            240 => Ok(OhlcInterval::FourHours),
            1440 => Ok(OhlcInterval::OneDay),
            10080 => Ok(OhlcInterval::OneWeek),
            21600 => Ok(OhlcInterval::FifteenDays),
            other => Err(format!("unsupported ohlc interval: {other}")),
        }
    }
}

/// Book depth, restricted to the values the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum BookDepth {
    Ten,
    TwentyFive,
    OneHundred,
    FiveHundred,
    OneThousand,
}

impl BookDepth {
    pub fn levels(self) -> u32 {
        match self {
            BookDepth::Ten => 10,
            BookDepth::TwentyFive => 25,
            BookDepth::OneHundred => 100,
            BookDepth::FiveHundred => 500,
            BookDepth::OneThousand => 1000,
        }
    }
}

impl From<BookDepth> for u32 {
    fn from(depth: BookDepth) -> u32 {
        depth.levels()
    }
}

impl TryFrom<u32> for BookDepth {
    type Error = String;

    fn try_from(levels: u32) -> Result<Self, String> {
        match levels {
            10 => Ok(BookDepth::Ten),
            25 => Ok(BookDepth::TwentyFive),
            100 => Ok(BookDepth::OneHundred),
            500 => Ok(BookDepth::FiveHundred),
            1000 => Ok(BookDepth::OneThousand),
            other => Err(format!("unsupported book depth: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription descriptor
// ---------------------------------------------------------------------------

/// The `subscription` object of subscribe/unsubscribe frames, also echoed
/// by the server inside `subscriptionStatus`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<OhlcInterval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<BookDepth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratecounter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidate_taker: Option<bool>,
}

impl SubscriptionSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct PingRequest {
    pub event: &'static str,
    pub reqid: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubscribeRequest<'a> {
    pub event: &'static str,
    pub reqid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<&'a [String]>,
    pub subscription: &'a SubscriptionSpec,
}

/// Parameters for the `addOrder` operation.
///
/// `volume`, `price`, `price2`, and the `close[*]` prices are forwarded
/// verbatim so callers can use the server's relative (`+n`) and
/// percentage (`#pct`) notations. `deadline` accepts the server's RFC3339
/// form.
#[derive(Debug, Clone, Serialize)]
pub struct AddOrder {
    #[serde(rename = "ordertype")]
    pub order_type: OrderType,
    #[serde(rename = "type")]
    pub side: OrderSide,
    pub pair: String,
    pub volume: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oflags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starttm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiretm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate: Option<bool>,
    #[serde(rename = "close[ordertype]", skip_serializing_if = "Option::is_none")]
    pub close_order_type: Option<OrderType>,
    #[serde(rename = "close[price]", skip_serializing_if = "Option::is_none")]
    pub close_price: Option<String>,
    #[serde(rename = "close[price2]", skip_serializing_if = "Option::is_none")]
    pub close_price2: Option<String>,
    #[serde(rename = "timeinforce", skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
}

impl AddOrder {
    pub fn new(
        pair: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        volume: impl Into<String>,
    ) -> Self {
        Self {
            order_type,
            side,
            pair: pair.into(),
            volume: volume.into(),
            price: None,
            price2: None,
            leverage: None,
            reduce_only: None,
            oflags: None,
            starttm: None,
            expiretm: None,
            deadline: None,
            userref: None,
            validate: None,
            close_order_type: None,
            close_price: None,
            close_price2: None,
            time_in_force: None,
        }
    }
}

/// Parameters for the `editOrder` operation.
#[derive(Debug, Clone, Serialize)]
pub struct EditOrder {
    #[serde(rename = "orderid")]
    pub order_id: String,
    pub pair: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oflags: Option<String>,
    #[serde(rename = "newuserref", skip_serializing_if = "Option::is_none")]
    pub new_userref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate: Option<bool>,
}

impl EditOrder {
    pub fn new(order_id: impl Into<String>, pair: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            pair: pair.into(),
            price: None,
            price2: None,
            volume: None,
            oflags: None,
            new_userref: None,
            validate: None,
        }
    }
}

/// Envelope wrapping an order request with the event tag, token, and
/// request id.
#[derive(Debug, Serialize)]
pub(crate) struct OrderEnvelope<'a, T: Serialize> {
    pub event: &'static str,
    pub token: &'a str,
    pub reqid: u64,
    #[serde(flatten)]
    pub body: &'a T,
}

#[derive(Debug, Serialize)]
pub(crate) struct CancelOrderRequest<'a> {
    pub event: &'static str,
    pub token: &'a str,
    pub reqid: u64,
    pub txid: &'a [String],
}

#[derive(Debug, Serialize)]
pub(crate) struct CancelAllRequest<'a> {
    pub event: &'static str,
    pub token: &'a str,
    pub reqid: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct CancelAllOrdersAfterRequest<'a> {
    pub event: &'static str,
    pub token: &'a str,
    pub reqid: u64,
    pub timeout: u64,
}

// ---------------------------------------------------------------------------
// Event-tagged responses
// ---------------------------------------------------------------------------

/// Result status echoed by request/response operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Ok,
    Error,
}

/// Status carried by `subscriptionStatus` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatusKind {
    Subscribed,
    Unsubscribed,
    Error,
}

/// `event: heartbeat` — emitted by the server roughly once per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Heartbeat {}

/// `event: systemStatus` — sent once on connect and on status changes.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemStatus {
    #[serde(rename = "connectionID")]
    pub connection_id: Option<u64>,
    pub status: String,
    pub version: String,
}

/// `event: pong` — echoes the request id of a ping.
#[derive(Debug, Clone, Deserialize)]
pub struct Pong {
    pub reqid: Option<u64>,
}

/// `event: subscriptionStatus` — one reply per pair of a subscribe or
/// unsubscribe request (a single reply for pairless private topics).
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionStatus {
    #[serde(rename = "channelID")]
    pub channel_id: Option<u64>,
    #[serde(rename = "channelName")]
    pub channel_name: Option<String>,
    pub reqid: Option<u64>,
    pub pair: Option<String>,
    pub status: SubscriptionStatusKind,
    pub subscription: Option<SubscriptionSpec>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

/// `event: error` — general error, with or without a request id.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    pub reqid: Option<u64>,
}

/// `event: addOrderStatus`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddOrderStatus {
    pub reqid: Option<u64>,
    pub status: RequestStatus,
    pub txid: Option<String>,
    pub descr: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

/// `event: editOrderStatus`.
#[derive(Debug, Clone, Deserialize)]
pub struct EditOrderStatus {
    pub reqid: Option<u64>,
    pub status: RequestStatus,
    pub txid: Option<String>,
    #[serde(rename = "originaltxid")]
    pub original_txid: Option<String>,
    pub descr: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

/// `event: cancelOrderStatus`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrderStatus {
    pub reqid: Option<u64>,
    pub status: RequestStatus,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

/// `event: cancelAllStatus`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelAllStatus {
    pub reqid: Option<u64>,
    pub status: RequestStatus,
    pub count: Option<u64>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

/// `event: cancelAllOrdersAfterStatus`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelAllOrdersAfterStatus {
    pub reqid: Option<u64>,
    pub status: RequestStatus,
    #[serde(rename = "currentTime")]
    pub current_time: Option<String>,
    #[serde(rename = "triggerTime")]
    pub trigger_time: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

/// A parsed order-operation response, attached to [`Error::Operation`] when
/// the server reports `status: "error"`.
#[derive(Debug, Clone)]
pub enum OrderResponse {
    Add(AddOrderStatus),
    Edit(EditOrderStatus),
    Cancel(CancelOrderStatus),
    CancelAll(CancelAllStatus),
    CancelAllAfter(CancelAllOrdersAfterStatus),
}

// ---------------------------------------------------------------------------
// Channel payloads
// ---------------------------------------------------------------------------

/// Best ask/bid level of a ticker: `[price, wholeLotVolume, lotVolume]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerLevel {
    pub price: Decimal,
    pub whole_lot_volume: u64,
    pub lot_volume: Decimal,
}

/// Last-trade-closed of a ticker: `[price, lotVolume]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerClose {
    pub price: Decimal,
    pub lot_volume: Decimal,
}

/// `[today, last24h]` pair used by the aggregate ticker fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DayRolling<T> {
    pub today: T,
    pub last_24h: T,
}

/// Ticker payload object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerData {
    #[serde(rename = "a")]
    pub ask: TickerLevel,
    #[serde(rename = "b")]
    pub bid: TickerLevel,
    #[serde(rename = "c")]
    pub last: TickerClose,
    #[serde(rename = "v")]
    pub volume: DayRolling<Decimal>,
    #[serde(rename = "p")]
    pub vwap: DayRolling<Decimal>,
    #[serde(rename = "t")]
    pub trade_count: DayRolling<u64>,
    #[serde(rename = "l")]
    pub low: DayRolling<Decimal>,
    #[serde(rename = "h")]
    pub high: DayRolling<Decimal>,
    #[serde(rename = "o")]
    pub open: DayRolling<Decimal>,
}

/// Candle payload array:
/// `[time, etime, open, high, low, close, vwap, volume, count]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OhlcData {
    pub time: Decimal,
    pub end_time: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub vwap: Decimal,
    pub volume: Decimal,
    pub count: u64,
}

/// Taker side of a public trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TradeSide {
    #[serde(rename = "b")]
    Buy,
    #[serde(rename = "s")]
    Sell,
}

/// Execution type of a public trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TradeOrderType {
    #[serde(rename = "m")]
    Market,
    #[serde(rename = "l")]
    Limit,
}

/// One public trade: `[price, volume, time, side, orderType, misc]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeData {
    pub price: Decimal,
    pub volume: Decimal,
    pub time: Decimal,
    pub side: TradeSide,
    pub order_type: TradeOrderType,
    #[serde(default)]
    pub misc: String,
}

/// Spread payload: `[bid, ask, timestamp, bidVolume, askVolume]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpreadData {
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
}

/// One book level: `[price, volume, timestamp]` plus an optional republish
/// marker (`"r"`) on update messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: Decimal,
    #[serde(default)]
    pub republished: Option<String>,
}

/// Book snapshot payload (`"as"`/`"bs"`).
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct BookSnapshotData {
    #[serde(rename = "as", default)]
    pub asks: Vec<PriceLevel>,
    #[serde(rename = "bs", default)]
    pub bids: Vec<PriceLevel>,
}

/// Book update payload (`"a"`/`"b"` plus the `"c"` checksum).
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct BookUpdateData {
    #[serde(rename = "a", default)]
    pub asks: Vec<PriceLevel>,
    #[serde(rename = "b", default)]
    pub bids: Vec<PriceLevel>,
    #[serde(rename = "c", default)]
    pub checksum: Option<String>,
}

/// One own trade, keyed by trade id in the message.
#[derive(Debug, Clone, Deserialize)]
pub struct OwnTrade {
    #[serde(rename = "ordertxid")]
    pub order_txid: Option<String>,
    #[serde(rename = "postxid")]
    pub position_txid: Option<String>,
    pub pair: Option<String>,
    pub time: Option<Decimal>,
    #[serde(rename = "type")]
    pub side: Option<OrderSide>,
    #[serde(rename = "ordertype")]
    pub order_type: Option<OrderType>,
    pub price: Option<Decimal>,
    pub cost: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub vol: Option<Decimal>,
    pub margin: Option<Decimal>,
    pub userref: Option<i64>,
}

/// Description object inside an open-order update.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrderDescription {
    pub pair: Option<String>,
    #[serde(rename = "type")]
    pub side: Option<OrderSide>,
    #[serde(rename = "ordertype")]
    pub order_type: Option<OrderType>,
    pub price: Option<Decimal>,
    pub price2: Option<Decimal>,
    pub leverage: Option<String>,
    pub order: Option<String>,
    pub close: Option<String>,
}

/// One open-order update, keyed by order id in the message. Status-only
/// updates carry nothing but `status`, so every field is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrderUpdate {
    pub status: Option<String>,
    pub refid: Option<String>,
    pub userref: Option<i64>,
    #[serde(rename = "opentm")]
    pub open_time: Option<Decimal>,
    #[serde(rename = "starttm")]
    pub start_time: Option<Decimal>,
    #[serde(rename = "expiretm")]
    pub expire_time: Option<Decimal>,
    pub descr: Option<OpenOrderDescription>,
    pub vol: Option<Decimal>,
    #[serde(rename = "vol_exec")]
    pub vol_exec: Option<Decimal>,
    pub cost: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub avg_price: Option<Decimal>,
    #[serde(rename = "stopprice")]
    pub stop_price: Option<Decimal>,
    #[serde(rename = "limitprice")]
    pub limit_price: Option<Decimal>,
    pub misc: Option<String>,
    pub oflags: Option<String>,
    #[serde(rename = "timeinforce")]
    pub time_in_force: Option<TimeInForce>,
    pub cancel_reason: Option<String>,
    #[serde(rename = "ratecount")]
    pub rate_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// Channel events
// ---------------------------------------------------------------------------

/// Ticker event: `[channelID, tickerData, "ticker", pair]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerEvent {
    pub channel_id: u64,
    pub pair: String,
    pub data: TickerData,
}

/// Candle event: `[channelID, ohlcData, "ohlc-<interval>", pair]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcEvent {
    pub channel_id: u64,
    pub pair: String,
    pub interval: Option<OhlcInterval>,
    pub data: OhlcData,
}

/// Trade event: `[channelID, [trade, ...], "trade", pair]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub channel_id: u64,
    pub pair: String,
    pub trades: Vec<TradeData>,
}

/// Spread event: `[channelID, spreadData, "spread", pair]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadEvent {
    pub channel_id: u64,
    pub pair: String,
    pub data: SpreadData,
}

/// Book snapshot event: `[channelID, {as, bs}, "book-<depth>", pair]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshotEvent {
    pub channel_id: u64,
    pub pair: String,
    pub depth: Option<BookDepth>,
    pub data: BookSnapshotData,
}

/// Book update event:
/// `[channelID, {a, c?}, {b, c?}?, "book-<depth>", pair]`. One-sided
/// updates carry a single payload object; two-sided updates carry two,
/// which are merged here.
#[derive(Debug, Clone, PartialEq)]
pub struct BookUpdateEvent {
    pub channel_id: u64,
    pub pair: String,
    pub depth: Option<BookDepth>,
    pub data: BookUpdateData,
}

/// A parsed book channel message, split on the structural probe: a payload
/// carrying the `"c"` checksum is an update, anything else is a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum BookMessage {
    Snapshot(BookSnapshotEvent),
    Update(BookUpdateEvent),
}

/// Own-trades event: `[[{tradeId: trade}, ...], "ownTrades", {sequence}]`.
#[derive(Debug, Clone)]
pub struct OwnTradesEvent {
    pub trades: Vec<BTreeMap<String, OwnTrade>>,
    pub sequence: u64,
}

/// Open-orders event: `[[{orderId: update}, ...], "openOrders", {sequence}]`.
#[derive(Debug, Clone)]
pub struct OpenOrdersEvent {
    pub orders: Vec<BTreeMap<String, OpenOrderUpdate>>,
    pub sequence: u64,
}

#[derive(Debug, Deserialize)]
struct SequenceTail {
    sequence: u64,
}

fn protocol(detail: impl Into<String>) -> Error {
    Error::Protocol(detail.into())
}

/// Split a public channel array into `(channelID, payloads, channelName, pair)`.
/// Payloads are the elements between the channel id and the channel name.
fn split_public(value: &Value) -> Result<(u64, &[Value], &str, &str), Error> {
    let items = value
        .as_array()
        .ok_or_else(|| protocol("channel message is not an array"))?;
    if items.len() < 4 {
        return Err(protocol(format!(
            "channel message has {} element(s), expected at least 4",
            items.len()
        )));
    }
    let channel_id = items[0]
        .as_u64()
        .ok_or_else(|| protocol("channel message has no numeric channel id"))?;
    let name = items[items.len() - 2]
        .as_str()
        .ok_or_else(|| protocol("channel message has no channel name"))?;
    let pair = items[items.len() - 1]
        .as_str()
        .ok_or_else(|| protocol("channel message has no pair"))?;
    Ok((channel_id, &items[1..items.len() - 2], name, pair))
}

/// Interval or depth suffix of a composite channel name like `ohlc-5`.
fn name_suffix(name: &str) -> Option<u32> {
    name.split_once('-').and_then(|(_, tail)| tail.parse().ok())
}

impl TickerEvent {
    pub fn from_message(value: &Value) -> Result<Self, Error> {
        let (channel_id, payloads, _, pair) = split_public(value)?;
        let [payload] = payloads else {
            return Err(protocol("ticker message has no payload"));
        };
        Ok(Self {
            channel_id,
            pair: pair.to_string(),
            data: serde_json::from_value(payload.clone())?,
        })
    }
}

impl OhlcEvent {
    pub fn from_message(value: &Value) -> Result<Self, Error> {
        let (channel_id, payloads, name, pair) = split_public(value)?;
        let [payload] = payloads else {
            return Err(protocol("ohlc message has no payload"));
        };
        Ok(Self {
            channel_id,
            pair: pair.to_string(),
            interval: name_suffix(name).and_then(|m| OhlcInterval::try_from(m).ok()),
            data: serde_json::from_value(payload.clone())?,
        })
    }
}

impl TradeEvent {
    pub fn from_message(value: &Value) -> Result<Self, Error> {
        let (channel_id, payloads, _, pair) = split_public(value)?;
        let [payload] = payloads else {
            return Err(protocol("trade message has no payload"));
        };
        Ok(Self {
            channel_id,
            pair: pair.to_string(),
            trades: serde_json::from_value(payload.clone())?,
        })
    }
}

impl SpreadEvent {
    pub fn from_message(value: &Value) -> Result<Self, Error> {
        let (channel_id, payloads, _, pair) = split_public(value)?;
        let [payload] = payloads else {
            return Err(protocol("spread message has no payload"));
        };
        Ok(Self {
            channel_id,
            pair: pair.to_string(),
            data: serde_json::from_value(payload.clone())?,
        })
    }
}

impl BookMessage {
    pub fn from_message(value: &Value) -> Result<Self, Error> {
        let (channel_id, payloads, name, pair) = split_public(value)?;
        if payloads.is_empty() {
            return Err(protocol("book message has no payload"));
        }
        let depth = name_suffix(name).and_then(|d| BookDepth::try_from(d).ok());
        let is_update = payloads.iter().any(|p| p.get("c").is_some());
        if is_update {
            let mut data = BookUpdateData::default();
            for payload in payloads {
                let part: BookUpdateData = serde_json::from_value(payload.clone())?;
                data.asks.extend(part.asks);
                data.bids.extend(part.bids);
                if part.checksum.is_some() {
                    data.checksum = part.checksum;
                }
            }
            Ok(BookMessage::Update(BookUpdateEvent {
                channel_id,
                pair: pair.to_string(),
                depth,
                data,
            }))
        } else {
            let [payload] = payloads else {
                return Err(protocol("book snapshot has more than one payload"));
            };
            Ok(BookMessage::Snapshot(BookSnapshotEvent {
                channel_id,
                pair: pair.to_string(),
                depth,
                data: serde_json::from_value(payload.clone())?,
            }))
        }
    }
}

/// Split a private channel array into `(payload, channelName, sequence)`.
fn split_private(value: &Value) -> Result<(&Value, &str, u64), Error> {
    let items = value
        .as_array()
        .ok_or_else(|| protocol("channel message is not an array"))?;
    if items.len() != 3 {
        return Err(protocol(format!(
            "private channel message has {} element(s), expected 3",
            items.len()
        )));
    }
    let name = items[1]
        .as_str()
        .ok_or_else(|| protocol("private channel message has no channel name"))?;
    let tail: SequenceTail = serde_json::from_value(items[2].clone())?;
    Ok((&items[0], name, tail.sequence))
}

impl OwnTradesEvent {
    pub fn from_message(value: &Value) -> Result<Self, Error> {
        let (payload, _, sequence) = split_private(value)?;
        Ok(Self {
            trades: serde_json::from_value(payload.clone())?,
            sequence,
        })
    }
}

impl OpenOrdersEvent {
    pub fn from_message(value: &Value) -> Result<Self, Error> {
        let (payload, _, sequence) = split_private(value)?;
        Ok(Self {
            orders: serde_json::from_value(payload.clone())?,
            sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ping_request_wire_shape() {
        let frame = serde_json::to_value(PingRequest {
            event: "ping",
            reqid: 42,
        })
        .unwrap();
        assert_eq!(frame, json!({"event": "ping", "reqid": 42}));
    }

    #[test]
    fn subscribe_request_wire_shape() {
        let pairs = vec!["XBT/USD".to_string(), "XBT/EUR".to_string()];
        let spec = SubscriptionSpec {
            interval: Some(OhlcInterval::FifteenMinutes),
            ..SubscriptionSpec::named("ohlc")
        };
        let frame = serde_json::to_value(SubscribeRequest {
            event: "subscribe",
            reqid: 7,
            pair: Some(&pairs),
            subscription: &spec,
        })
        .unwrap();
        assert_eq!(
            frame,
            json!({
                "event": "subscribe",
                "reqid": 7,
                "pair": ["XBT/USD", "XBT/EUR"],
                "subscription": {"name": "ohlc", "interval": 15}
            })
        );
    }

    #[test]
    fn private_subscribe_omits_pair_and_carries_token() {
        let spec = SubscriptionSpec {
            token: Some("WW91ciBhdXRo".to_string()),
            snapshot: Some(false),
            consolidate_taker: Some(true),
            ..SubscriptionSpec::named("ownTrades")
        };
        let frame = serde_json::to_value(SubscribeRequest {
            event: "subscribe",
            reqid: 9,
            pair: None,
            subscription: &spec,
        })
        .unwrap();
        assert_eq!(
            frame,
            json!({
                "event": "subscribe",
                "reqid": 9,
                "subscription": {
                    "name": "ownTrades",
                    "token": "WW91ciBhdXRo",
                    "snapshot": false,
                    "consolidate_taker": true
                }
            })
        );
    }

    #[test]
    fn add_order_wire_shape() {
        let mut order = AddOrder::new("XBT/USD", OrderSide::Buy, OrderType::StopLossLimit, "0.5");
        order.price = Some("+10".to_string());
        order.price2 = Some("#5.0".to_string());
        order.time_in_force = Some(TimeInForce::GoodTillCancelled);
        order.close_order_type = Some(OrderType::Limit);
        order.close_price = Some("38000".to_string());
        order.validate = Some(true);

        let frame = serde_json::to_value(OrderEnvelope {
            event: "addOrder",
            token: "tok",
            reqid: 3,
            body: &order,
        })
        .unwrap();
        assert_eq!(
            frame,
            json!({
                "event": "addOrder",
                "token": "tok",
                "reqid": 3,
                "ordertype": "stop-loss-limit",
                "type": "buy",
                "pair": "XBT/USD",
                "volume": "0.5",
                "price": "+10",
                "price2": "#5.0",
                "validate": true,
                "close[ordertype]": "limit",
                "close[price]": "38000",
                "timeinforce": "GTC"
            })
        );
    }

    #[test]
    fn cancel_all_after_wire_shape() {
        let frame = serde_json::to_value(CancelAllOrdersAfterRequest {
            event: "cancelAllOrdersAfter",
            token: "tok",
            reqid: 5,
            timeout: 60,
        })
        .unwrap();
        assert_eq!(
            frame,
            json!({
                "event": "cancelAllOrdersAfter",
                "token": "tok",
                "reqid": 5,
                "timeout": 60
            })
        );
    }

    #[test]
    fn subscription_status_decodes_error_reply() {
        let status: SubscriptionStatus = serde_json::from_value(json!({
            "event": "subscriptionStatus",
            "reqid": 11,
            "pair": "BAD/PAIR",
            "status": "error",
            "errorMessage": "Currency pair not supported"
        }))
        .unwrap();
        assert_eq!(status.reqid, Some(11));
        assert_eq!(status.status, SubscriptionStatusKind::Error);
        assert_eq!(
            status.error_message.as_deref(),
            Some("Currency pair not supported")
        );
    }

    #[test]
    fn ticker_event_decodes_positionally() {
        let event = TickerEvent::from_message(&json!([
            340,
            {
                "a": ["5525.40000", 1, "1.000"],
                "b": ["5525.10000", 1, "1.000"],
                "c": ["5525.10000", "0.00398963"],
                "v": ["2634.11501494", "3591.17907851"],
                "p": ["5631.44067", "5653.78939"],
                "t": [11493, 16267],
                "l": ["5505.00000", "5505.00000"],
                "h": ["5783.00000", "5783.00000"],
                "o": ["5760.70000", "5637.30000"]
            },
            "ticker",
            "XBT/USD"
        ]))
        .unwrap();
        assert_eq!(event.channel_id, 340);
        assert_eq!(event.pair, "XBT/USD");
        assert_eq!(event.data.ask.price, "5525.40000".parse().unwrap());
        assert_eq!(event.data.trade_count.today, 11493);
    }

    #[test]
    fn ohlc_event_carries_interval_from_channel_name() {
        let event = OhlcEvent::from_message(&json!([
            42,
            ["1542057314.748456", "1542057360.435743", "3586.70000", "3586.70000",
             "3586.60000", "3586.60000", "3586.68894", "0.03373000", 2],
            "ohlc-5",
            "XBT/USD"
        ]))
        .unwrap();
        assert_eq!(event.interval, Some(OhlcInterval::FiveMinutes));
        assert_eq!(event.data.count, 2);
        assert_eq!(event.data.close, "3586.60000".parse().unwrap());
    }

    #[test]
    fn trade_event_decodes_each_trade() {
        let event = TradeEvent::from_message(&json!([
            0,
            [
                ["5541.20000", "0.15850568", "1534614057.321597", "s", "l", ""],
                ["6060.00000", "0.02455000", "1534614057.324998", "b", "m", ""]
            ],
            "trade",
            "XBT/USD"
        ]))
        .unwrap();
        assert_eq!(event.trades.len(), 2);
        assert_eq!(event.trades[0].side, TradeSide::Sell);
        assert_eq!(event.trades[1].order_type, TradeOrderType::Market);
    }

    #[test]
    fn spread_event_decodes_positionally() {
        let event = SpreadEvent::from_message(&json!([
            0,
            ["5698.40000", "5700.00000", "1542057299.545897", "1.01234567", "0.98765432"],
            "spread",
            "XBT/USD"
        ]))
        .unwrap();
        assert_eq!(event.data.bid, "5698.40000".parse().unwrap());
        assert_eq!(event.data.ask_volume, "0.98765432".parse().unwrap());
    }

    #[test]
    fn book_snapshot_has_no_checksum_field() {
        let message = BookMessage::from_message(&json!([
            0,
            {
                "as": [["5541.30000", "2.50700000", "1534614248.123678"]],
                "bs": [["5541.20000", "1.52900000", "1534614248.765567"]]
            },
            "book-100",
            "XBT/USD"
        ]))
        .unwrap();
        let BookMessage::Snapshot(snapshot) = message else {
            panic!("expected snapshot, got {message:?}");
        };
        assert_eq!(snapshot.depth, Some(BookDepth::OneHundred));
        assert_eq!(snapshot.data.asks.len(), 1);
        assert_eq!(snapshot.data.bids[0].volume, "1.52900000".parse().unwrap());
    }

    #[test]
    fn two_sided_book_update_merges_payloads() {
        let message = BookMessage::from_message(&json!([
            1234,
            {"a": [["5541.30000", "2.50700000", "1534614248.456738"]]},
            {"b": [["5541.30000", "0.00000000", "1534614335.345903"]], "c": "974942666"},
            "book-10",
            "XBT/USD"
        ]))
        .unwrap();
        let BookMessage::Update(update) = message else {
            panic!("expected update, got {message:?}");
        };
        assert_eq!(update.data.asks.len(), 1);
        assert_eq!(update.data.bids.len(), 1);
        assert_eq!(update.data.checksum.as_deref(), Some("974942666"));
    }

    #[test]
    fn republished_book_levels_keep_the_marker() {
        let message = BookMessage::from_message(&json!([
            1234,
            {"a": [["5541.30000", "2.50700000", "1534614248.456738", "r"]], "c": "77"},
            "book-25",
            "XBT/USD"
        ]))
        .unwrap();
        let BookMessage::Update(update) = message else {
            panic!("expected update, got {message:?}");
        };
        assert_eq!(update.data.asks[0].republished.as_deref(), Some("r"));
    }

    #[test]
    fn own_trades_event_decodes_sequence_and_entries() {
        let event = OwnTradesEvent::from_message(&json!([
            [
                {"TDLH43-DVQXD-2KHVYY": {
                    "cost": "1000000.00000",
                    "fee": "1600.00000",
                    "margin": "0.00000",
                    "ordertxid": "TDLH43-DVQXD-2KHVYY",
                    "ordertype": "limit",
                    "pair": "XBT/EUR",
                    "postxid": "OGTT3Y-C6I3P-XRI6HX",
                    "price": "100000.00000",
                    "time": "1560516023.070651",
                    "type": "sell",
                    "vol": "1000000000.00000000"
                }}
            ],
            "ownTrades",
            {"sequence": 2948}
        ]))
        .unwrap();
        assert_eq!(event.sequence, 2948);
        let trade = &event.trades[0]["TDLH43-DVQXD-2KHVYY"];
        assert_eq!(trade.pair.as_deref(), Some("XBT/EUR"));
        assert_eq!(trade.side, Some(OrderSide::Sell));
    }

    #[test]
    fn open_orders_status_only_update_decodes() {
        let event = OpenOrdersEvent::from_message(&json!([
            [
                {"OGTT3Y-C6I3P-XRI6HX": {"status": "canceled", "cancel_reason": "User requested"}}
            ],
            "openOrders",
            {"sequence": 234}
        ]))
        .unwrap();
        assert_eq!(event.sequence, 234);
        let order = &event.orders[0]["OGTT3Y-C6I3P-XRI6HX"];
        assert_eq!(order.status.as_deref(), Some("canceled"));
        assert_eq!(order.cancel_reason.as_deref(), Some("User requested"));
    }

    #[test]
    fn malformed_channel_message_is_rejected() {
        let err = TickerEvent::from_message(&json!([340, {}])).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn edit_order_wire_shape() {
        let mut edit = EditOrder::new("OGTT3Y-C6I3P-XRI6HX", "XBT/USD");
        edit.price = Some("36000".to_string());
        edit.new_userref = Some("43".to_string());
        edit.validate = Some(true);

        let frame = serde_json::to_value(OrderEnvelope {
            event: "editOrder",
            token: "tok",
            reqid: 8,
            body: &edit,
        })
        .unwrap();
        assert_eq!(
            frame,
            json!({
                "event": "editOrder",
                "token": "tok",
                "reqid": 8,
                "orderid": "OGTT3Y-C6I3P-XRI6HX",
                "pair": "XBT/USD",
                "price": "36000",
                "newuserref": "43",
                "validate": true
            })
        );
    }

    #[test]
    fn cancel_order_wire_shape() {
        let txids = vec!["OGTT3Y-C6I3P-XRI6HX".to_string(), "42".to_string()];
        let frame = serde_json::to_value(CancelOrderRequest {
            event: "cancelOrder",
            token: "tok",
            reqid: 4,
            txid: &txids,
        })
        .unwrap();
        assert_eq!(
            frame,
            json!({
                "event": "cancelOrder",
                "token": "tok",
                "reqid": 4,
                "txid": ["OGTT3Y-C6I3P-XRI6HX", "42"]
            })
        );
    }

    #[test]
    fn system_status_decodes() {
        let status: SystemStatus = serde_json::from_value(json!({
            "connectionID": 8628615390848610000u64,
            "event": "systemStatus",
            "status": "online",
            "version": "1.0.0"
        }))
        .unwrap();
        assert_eq!(status.connection_id, Some(8628615390848610000));
        assert_eq!(status.status, "online");
    }

    #[test]
    fn pong_without_reqid_decodes_as_none() {
        let pong: Pong = serde_json::from_value(json!({"event": "pong"})).unwrap();
        assert_eq!(pong.reqid, None);
    }

    #[test]
    fn add_order_status_decodes_both_outcomes() {
        let accepted: AddOrderStatus = serde_json::from_value(json!({
            "event": "addOrderStatus",
            "reqid": 42,
            "status": "ok",
            "txid": "ONPNXH-KMKMU-F4MR5V",
            "descr": "buy 0.0002 XBT/USD @ market"
        }))
        .unwrap();
        assert_eq!(accepted.status, RequestStatus::Ok);
        assert_eq!(accepted.txid.as_deref(), Some("ONPNXH-KMKMU-F4MR5V"));

        let rejected: AddOrderStatus = serde_json::from_value(json!({
            "event": "addOrderStatus",
            "reqid": 43,
            "status": "error",
            "errorMessage": "EOrder:Order minimum not met"
        }))
        .unwrap();
        assert_eq!(rejected.status, RequestStatus::Error);
        assert_eq!(
            rejected.error_message.as_deref(),
            Some("EOrder:Order minimum not met")
        );
    }

    #[test]
    fn edit_order_status_decodes() {
        let status: EditOrderStatus = serde_json::from_value(json!({
            "event": "editOrderStatus",
            "reqid": 5,
            "status": "ok",
            "txid": "OTI672-HJFAO-XOIPPK",
            "originaltxid": "O65KZW-J4AW3-VFS74A",
            "descr": "order edited price = 9000.00000000"
        }))
        .unwrap();
        assert_eq!(status.original_txid.as_deref(), Some("O65KZW-J4AW3-VFS74A"));
    }

    #[test]
    fn cancel_statuses_decode() {
        let all: CancelAllStatus = serde_json::from_value(json!({
            "event": "cancelAllStatus",
            "reqid": 6,
            "status": "ok",
            "count": 2
        }))
        .unwrap();
        assert_eq!(all.count, Some(2));

        let after: CancelAllOrdersAfterStatus = serde_json::from_value(json!({
            "event": "cancelAllOrdersAfterStatus",
            "reqid": 7,
            "status": "ok",
            "currentTime": "2020-12-21T09:37:09Z",
            "triggerTime": "2020-12-21T09:38:09Z"
        }))
        .unwrap();
        assert_eq!(after.trigger_time.as_deref(), Some("2020-12-21T09:38:09Z"));
    }

    #[test]
    fn subscription_status_echoes_the_descriptor() {
        let status: SubscriptionStatus = serde_json::from_value(json!({
            "channelID": 10001,
            "channelName": "ohlc-5",
            "event": "subscriptionStatus",
            "pair": "XBT/EUR",
            "reqid": 3,
            "status": "subscribed",
            "subscription": {"interval": 5, "name": "ohlc"}
        }))
        .unwrap();
        assert_eq!(status.channel_id, Some(10001));
        let spec = status.subscription.expect("descriptor should be echoed");
        assert_eq!(spec.name, "ohlc");
        assert_eq!(spec.interval, Some(OhlcInterval::FiveMinutes));
    }

    #[test]
    fn unsupported_interval_and_depth_are_rejected() {
        assert!(OhlcInterval::try_from(7).is_err());
        assert!(BookDepth::try_from(50).is_err());
        assert!(serde_json::from_value::<OhlcInterval>(json!(7)).is_err());
        assert!(serde_json::from_value::<BookDepth>(json!(50)).is_err());
    }

    #[test]
    fn interval_and_depth_serialize_as_wire_numbers() {
        assert_eq!(
            serde_json::to_value(OhlcInterval::FourHours).unwrap(),
            json!(240)
        );
        assert_eq!(
            serde_json::to_value(BookDepth::OneThousand).unwrap(),
            json!(1000)
        );
    }
}
