//! SQL templates for the tonga engine functions.
//!
//! Every call uses named-argument notation so that optional arguments
//! (`delete_at`, `deliver_at`) can be left out and fall back to the
//! function defaults.

pub const CREATE_CHANNEL: &str =
    "select * from tonga_create_channel(queue_name => $1, topic => $2, unlogged => $3);";

pub const CREATE_CHANNEL_WITH_DELETE_AT: &str = "select * from tonga_create_channel(queue_name => $1, topic => $2, delete_at => $3, unlogged => $4);";

pub const DELETE_CHANNEL: &str = "select * from tonga_delete_channel(queue_name => $1);";

pub const SEND: &str = "select * from tonga_send(topic => $1, body => $2);";

pub const SEND_WITH_DELIVER_AT: &str =
    "select * from tonga_send(topic => $1, body => $2, deliver_at => $3);";

pub const READ: &str =
    "select id, topic, body, created_at, deliver_at from tonga_read(queue_name => $1, quantity => $2, hide_for => $3);";

pub const DELETE: &str = "select * from tonga_delete(queue_name => $1, id => $2);";

pub const GC: &str = "select * from tonga_gc();";

pub const METRICS: &str = "select total, visible, hidden, deferred, oldest_visible_age_seconds from tonga_metrics(queue_name => $1);";

pub const LIST_CHANNELS: &str =
    "select name, topic, delete_at, unlogged, created_at from tonga_channels order by name;";

pub const HEALTH_CHECK: &str = "select 1 as health_check;";
