use std::fmt;

use crate::errors::Result;
use crate::proto::viewpb::{self, GetViewArgs, PingArgs, ViewClient};

/// Who is primary and who is backup, as decided by the view service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct View {
    pub viewnum: u64,
    pub primary: Option<String>,
    pub backup: Option<String>,
}

impl View {
    pub fn new(viewnum: u64, primary: Option<&str>, backup: Option<&str>) -> View {
        View {
            viewnum,
            primary: primary.map(str::to_owned),
            backup: backup.map(str::to_owned),
        }
    }

    pub fn is_primary(&self, me: &str) -> bool {
        !me.is_empty() && self.primary.as_deref() == Some(me)
    }

    pub fn is_backup(&self, me: &str) -> bool {
        !me.is_empty() && self.backup.as_deref() == Some(me)
    }
}

fn non_empty(id: String) -> Option<String> {
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

impl From<viewpb::View> for View {
    fn from(v: viewpb::View) -> View {
        View {
            viewnum: v.viewnum,
            primary: non_empty(v.primary),
            backup: non_empty(v.backup),
        }
    }
}

impl From<View> for viewpb::View {
    fn from(v: View) -> viewpb::View {
        viewpb::View {
            viewnum: v.viewnum,
            primary: v.primary.unwrap_or_default(),
            backup: v.backup.unwrap_or_default(),
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{}(p={}, b={})",
            self.viewnum,
            self.primary.as_deref().unwrap_or("-"),
            self.backup.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Role {
    Primary,
    Backup,
    #[default]
    Idle,
}

impl Role {
    /// The role `me` plays in `view`.
    pub fn of(view: &View, me: &str) -> Role {
        if view.is_primary(me) {
            Role::Primary
        } else if view.is_backup(me) {
            Role::Backup
        } else {
            Role::Idle
        }
    }
}

/// This server's line to the view service.
#[derive(Clone)]
pub struct ViewCache {
    me: String,
    client: ViewClient,
}

impl ViewCache {
    pub fn new(me: String, client: ViewClient) -> ViewCache {
        ViewCache { me, client }
    }

    /// Reports liveness along with the last view seen, and learns the current one.
    pub async fn ping(&self, viewnum: u64) -> Result<View> {
        let args = PingArgs {
            me: self.me.clone(),
            viewnum,
        };
        let reply = self.client.ping(&args).await?;
        Ok(reply.view.map(View::from).unwrap_or_default())
    }

    /// Fetches the current view without registering liveness.
    pub async fn refresh(&self) -> Result<View> {
        let reply = self.client.get(&GetViewArgs {}).await?;
        Ok(reply.view.map(View::from).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_of() {
        let view = View::new(3, Some("a"), Some("b"));
        assert_eq!(Role::of(&view, "a"), Role::Primary);
        assert_eq!(Role::of(&view, "b"), Role::Backup);
        assert_eq!(Role::of(&view, "c"), Role::Idle);
        assert_eq!(Role::of(&View::default(), "a"), Role::Idle);
    }

    #[test]
    fn test_empty_id_never_matches() {
        let view = View::from(viewpb::View {
            viewnum: 1,
            primary: "a".to_owned(),
            backup: String::new(),
        });
        assert_eq!(view.backup, None);
        assert_eq!(Role::of(&view, ""), Role::Idle);
    }

    #[test]
    fn test_at_most_one_primary_and_backup_per_view() {
        let ids = ["a", "b", "c", "d"];
        let views = [
            View::new(1, Some("a"), None),
            View::new(2, Some("a"), Some("b")),
            View::new(3, Some("b"), Some("c")),
            View::new(4, None, None),
        ];
        for view in &views {
            let roles: Vec<Role> = ids.iter().map(|id| Role::of(view, id)).collect();
            let primaries = roles.iter().filter(|r| **r == Role::Primary).count();
            let backups = roles.iter().filter(|r| **r == Role::Backup).count();
            assert!(primaries <= 1, "{} has {} primaries", view, primaries);
            assert!(backups <= 1, "{} has {} backups", view, backups);
        }
    }

    #[test]
    fn test_wire_conversion_keeps_absent_ids_absent() {
        let view = View::new(7, Some("p"), None);
        let wire = viewpb::View::from(view.clone());
        assert_eq!(wire.backup, "");
        assert_eq!(View::from(wire), view);
    }
}
