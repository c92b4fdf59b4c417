//! Connection configuration capture
//!
//! Records every setting applied to a connection builder so two build
//! attempts can be compared. Settings the capture does not understand are
//! flagged; a configuration with such settings is never matched against a
//! cached connection.

use crate::sink::{EventSink, ListenerSink};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Gateway intents, as a bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Intents(pub u64);

impl Intents {
    pub const NONE: Intents = Intents(0);
    pub const ALL: Intents = Intents(u64::MAX);

    pub fn contains(self, other: Intents) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Intents) -> Intents {
        Intents(self.0 | other.0)
    }
}

/// Presence status shown by the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnlineStatus {
    Online,
    Idle,
    DoNotDisturb,
    Invisible,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Playing,
    Streaming,
    Listening,
    Watching,
    Custom,
    Competing,
}

/// Activity shown next to the status
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Activity {
    pub kind: ActivityKind,
    pub name: String,
    pub url: Option<String>,
}

impl Activity {
    pub fn new(kind: ActivityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            url: None,
        }
    }
}

/// Optional caches the connection maintains
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheFlag {
    Activity,
    Voice,
    Emoji,
    Sticker,
    ClientStatus,
    MemberOverrides,
    Roles,
    ScheduledEvents,
    OnlineStatus,
}

impl CacheFlag {
    pub const ALL: [CacheFlag; 9] = [
        CacheFlag::Activity,
        CacheFlag::Voice,
        CacheFlag::Emoji,
        CacheFlag::Sticker,
        CacheFlag::ClientStatus,
        CacheFlag::MemberOverrides,
        CacheFlag::Roles,
        CacheFlag::ScheduledEvents,
        CacheFlag::OnlineStatus,
    ];
}

/// Set of enabled cache flags
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CacheFlags(BTreeSet<CacheFlag>);

impl CacheFlags {
    pub fn all() -> Self {
        Self(CacheFlag::ALL.into_iter().collect())
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, flag: CacheFlag) -> bool {
        self.0.contains(&flag)
    }

    pub fn enable(&mut self, flags: impl IntoIterator<Item = CacheFlag>) {
        self.0.extend(flags);
    }

    pub fn disable(&mut self, flags: impl IntoIterator<Item = CacheFlag>) {
        for flag in flags {
            self.0.remove(&flag);
        }
    }
}

impl FromIterator<CacheFlag> for CacheFlags {
    fn from_iter<T: IntoIterator<Item = CacheFlag>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which members are kept in the member cache. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberCachePolicy {
    None,
    All,
    Owner,
    Online,
    Voice,
    Booster,
    Pending,
    Default,
    Or(Vec<MemberCachePolicy>),
    And(Vec<MemberCachePolicy>),
}

/// Which units have their members requested on startup. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChunkingFilter {
    All,
    None,
    Include(BTreeSet<u64>),
    Exclude(BTreeSet<u64>),
}

/// Recognized builder settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SettingKind {
    Identity,
    Intents,
    Status,
    EventPassthrough,
    CacheFlags,
    MemberCachePolicy,
    ChunkingFilter,
    LargeThreshold,
    Activity,
}

/// Value recorded for a [`SettingKind`]
#[derive(Clone, PartialEq, Eq)]
pub enum SettingValue {
    Identity(String),
    Intents(Intents),
    Status(OnlineStatus),
    Flag(bool),
    CacheFlags(CacheFlags),
    MemberCachePolicy(MemberCachePolicy),
    ChunkingFilter(ChunkingFilter),
    Threshold(u32),
    Activity(Option<Activity>),
}

impl fmt::Debug for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Identity(_) => f.write_str("Identity(<redacted>)"),
            SettingValue::Intents(v) => f.debug_tuple("Intents").field(v).finish(),
            SettingValue::Status(v) => f.debug_tuple("Status").field(v).finish(),
            SettingValue::Flag(v) => f.debug_tuple("Flag").field(v).finish(),
            SettingValue::CacheFlags(v) => f.debug_tuple("CacheFlags").field(v).finish(),
            SettingValue::MemberCachePolicy(v) => {
                f.debug_tuple("MemberCachePolicy").field(v).finish()
            }
            SettingValue::ChunkingFilter(v) => f.debug_tuple("ChunkingFilter").field(v).finish(),
            SettingValue::Threshold(v) => f.debug_tuple("Threshold").field(v).finish(),
            SettingValue::Activity(v) => f.debug_tuple("Activity").field(v).finish(),
        }
    }
}

/// Settings captured for one build attempt.
///
/// The event sink is recorded but not compared: the continuity layer swaps
/// it on reuse.
pub struct ConnectionConfiguration<E> {
    settings: BTreeMap<SettingKind, SettingValue>,
    unsupported: BTreeSet<String>,
    event_sink: Arc<dyn EventSink<E>>,
}

impl<E: Send + 'static> ConnectionConfiguration<E> {
    /// Empty configuration using a [`ListenerSink`].
    pub fn new() -> Self {
        Self {
            settings: BTreeMap::new(),
            unsupported: BTreeSet::new(),
            event_sink: Arc::new(ListenerSink::new()),
        }
    }
}

impl<E: Send + 'static> Default for ConnectionConfiguration<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ConnectionConfiguration<E> {
    /// Seed the settings every connection has.
    ///
    /// Cache flags start from "all" and are narrowed by later
    /// [`disable_cache`](Self::disable_cache) calls.
    pub fn on_init(&mut self, identity: impl Into<String>, intents: Intents) {
        self.settings
            .insert(SettingKind::Identity, SettingValue::Identity(identity.into()));
        self.settings
            .insert(SettingKind::Intents, SettingValue::Intents(intents));
        self.settings.insert(
            SettingKind::CacheFlags,
            SettingValue::CacheFlags(CacheFlags::all()),
        );
    }

    pub fn set_status(&mut self, status: OnlineStatus) {
        self.settings
            .insert(SettingKind::Status, SettingValue::Status(status));
    }

    pub fn set_event_sink(&mut self, sink: Arc<dyn EventSink<E>>) {
        self.event_sink = sink;
    }

    pub fn set_event_passthrough(&mut self, enabled: bool) {
        self.settings
            .insert(SettingKind::EventPassthrough, SettingValue::Flag(enabled));
    }

    pub fn enable_cache(&mut self, flags: impl IntoIterator<Item = CacheFlag>) {
        self.update_cache_flags(|current| current.enable(flags));
    }

    pub fn disable_cache(&mut self, flags: impl IntoIterator<Item = CacheFlag>) {
        self.update_cache_flags(|current| current.disable(flags));
    }

    pub fn set_member_cache_policy(&mut self, policy: MemberCachePolicy) {
        self.settings.insert(
            SettingKind::MemberCachePolicy,
            SettingValue::MemberCachePolicy(policy),
        );
    }

    pub fn set_chunking_filter(&mut self, filter: ChunkingFilter) {
        self.settings.insert(
            SettingKind::ChunkingFilter,
            SettingValue::ChunkingFilter(filter),
        );
    }

    pub fn set_large_threshold(&mut self, threshold: u32) {
        self.settings
            .insert(SettingKind::LargeThreshold, SettingValue::Threshold(threshold));
    }

    pub fn set_activity(&mut self, activity: Option<Activity>) {
        self.settings
            .insert(SettingKind::Activity, SettingValue::Activity(activity));
    }

    /// Record a builder call this capture cannot compare.
    ///
    /// The first occurrence of each signature is logged.
    pub fn mark_unsupported_value(&mut self, signature: impl Into<String>) {
        let signature = signature.into();
        if self.unsupported.insert(signature.clone()) {
            warn!("Unsupported builder method '{signature}', the connection will not be cached between restarts");
        }
    }

    pub fn has_unsupported_values(&self) -> bool {
        !self.unsupported.is_empty()
    }

    /// Distinct unsupported call signatures seen so far.
    pub fn unsupported_values(&self) -> impl Iterator<Item = &str> {
        self.unsupported.iter().map(String::as_str)
    }

    pub fn get(&self, kind: SettingKind) -> Option<&SettingValue> {
        self.settings.get(&kind)
    }

    pub fn identity(&self) -> Option<&str> {
        match self.settings.get(&SettingKind::Identity) {
            Some(SettingValue::Identity(identity)) => Some(identity),
            _ => None,
        }
    }

    pub fn event_sink(&self) -> Arc<dyn EventSink<E>> {
        Arc::clone(&self.event_sink)
    }

    /// Whether both attempts recorded exactly the same recognized settings.
    pub fn is_same_as(&self, other: &ConnectionConfiguration<E>) -> bool {
        self.settings == other.settings
    }

    fn update_cache_flags(&mut self, update: impl FnOnce(&mut CacheFlags)) {
        let mut flags = match self.settings.remove(&SettingKind::CacheFlags) {
            Some(SettingValue::CacheFlags(flags)) => flags,
            _ => CacheFlags::all(),
        };
        update(&mut flags);
        self.settings
            .insert(SettingKind::CacheFlags, SettingValue::CacheFlags(flags));
    }
}

impl<E> Clone for ConnectionConfiguration<E> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            unsupported: self.unsupported.clone(),
            event_sink: Arc::clone(&self.event_sink),
        }
    }
}

impl<E> fmt::Debug for ConnectionConfiguration<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfiguration")
            .field("settings", &self.settings)
            .field("unsupported", &self.unsupported)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn base() -> ConnectionConfiguration<()> {
        let mut config = ConnectionConfiguration::new();
        config.on_init("token-a", Intents(0b1011));
        config.set_status(OnlineStatus::Idle);
        config.set_activity(Some(Activity::new(ActivityKind::Watching, "the logs")));
        config
    }

    #[test]
    fn test_on_init_seeds_identity_intents_and_all_cache_flags() {
        let config = base();
        assert_eq!(config.identity(), Some("token-a"));
        assert_eq!(
            config.get(SettingKind::Intents),
            Some(&SettingValue::Intents(Intents(0b1011)))
        );
        assert_eq!(
            config.get(SettingKind::CacheFlags),
            Some(&SettingValue::CacheFlags(CacheFlags::all()))
        );
    }

    #[test]
    fn test_cache_flags_narrow_and_widen() {
        let mut config = base();
        config.disable_cache([CacheFlag::Voice, CacheFlag::Emoji]);
        config.enable_cache([CacheFlag::Emoji]);

        let Some(SettingValue::CacheFlags(flags)) = config.get(SettingKind::CacheFlags) else {
            panic!("cache flags missing");
        };
        assert!(!flags.contains(CacheFlag::Voice));
        assert!(flags.contains(CacheFlag::Emoji));
        assert!(flags.contains(CacheFlag::Roles));
    }

    #[test]
    fn test_is_same_as_reflexive_and_symmetric() {
        let a = base();
        let b = base();
        assert!(a.is_same_as(&a));
        assert!(a.is_same_as(&b));
        assert!(b.is_same_as(&a));

        let mut c = base();
        c.set_large_threshold(250);
        assert!(!a.is_same_as(&c));
        assert!(!c.is_same_as(&a));
    }

    #[test]
    fn test_policies_compare_by_value() {
        let mut a = base();
        let mut b = base();
        a.set_member_cache_policy(MemberCachePolicy::Or(vec![
            MemberCachePolicy::Voice,
            MemberCachePolicy::Owner,
        ]));
        b.set_member_cache_policy(MemberCachePolicy::Or(vec![
            MemberCachePolicy::Voice,
            MemberCachePolicy::Owner,
        ]));
        a.set_chunking_filter(ChunkingFilter::Include([1, 2].into()));
        b.set_chunking_filter(ChunkingFilter::Include([2, 1].into()));
        assert!(a.is_same_as(&b));
    }

    #[test]
    fn test_event_sink_not_compared() {
        let a = base();
        let mut b = base();
        b.set_event_sink(Arc::new(ListenerSink::new()));
        assert!(a.is_same_as(&b));
    }

    #[test]
    fn test_unsupported_marker_is_sticky_and_ignored_by_comparison() {
        let a = base();
        let mut b = base();
        assert!(!b.has_unsupported_values());

        b.mark_unsupported_value("setRateLimitScheduler(ScheduledExecutorService)");
        b.mark_unsupported_value("setRateLimitScheduler(ScheduledExecutorService)");
        b.mark_unsupported_value("setHttpClient(OkHttpClient)");

        assert!(b.has_unsupported_values());
        assert_eq!(b.unsupported_values().count(), 2);
        assert!(a.is_same_as(&b));
    }

    #[test]
    #[traced_test]
    fn test_unsupported_signature_warned_once() {
        let mut config = base();
        config.mark_unsupported_value("setHttpClient(OkHttpClient)");
        config.mark_unsupported_value("setHttpClient(OkHttpClient)");

        assert!(logs_contain("Unsupported builder method 'setHttpClient(OkHttpClient)'"));
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("setHttpClient"))
                .count()
            {
                1 => Ok(()),
                n => Err(format!("expected one warning, got {n}")),
            }
        });
    }

    #[test]
    fn test_debug_redacts_identity() {
        let rendered = format!("{:?}", base());
        assert!(!rendered.contains("token-a"));
        assert!(rendered.contains("<redacted>"));
    }
}
