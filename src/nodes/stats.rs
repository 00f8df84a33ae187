use serde::{Deserialize, Serialize};

/// Load statistics periodically reported by a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    #[serde(default)]
    pub uptime: u64,
    pub cpu: CpuStats,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Audio frame counters for the last minute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

impl NodeStats {
    /// Penalty score used to rank nodes.
    ///
    /// Every player counts once, CPU load grows exponentially, and each
    /// missing frame is penalised (nulled frames twice as much as deficit).
    pub fn penalty(&self) -> u64 {
        let players = i64::from(self.players);
        let cpu = (1.05f64.powf(100.0 * self.cpu.system_load) * 10.0 - 10.0).round() as i64;
        let frames = self
            .frame_stats
            .as_ref()
            .map(|f| f.deficit + f.nulled * 2)
            .unwrap_or(0);

        (players + cpu + frames).max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn idle_node_has_no_penalty() {
        assert_eq!(NodeStats::default().penalty(), 0);
    }

    #[test]
    fn penalty_counts_players_cpu_and_frames() {
        let stats = NodeStats {
            players: 3,
            playing_players: 2,
            uptime: 1_000,
            cpu: CpuStats {
                cores: 4,
                system_load: 0.1,
                lavalink_load: 0.05,
            },
            frame_stats: Some(FrameStats {
                sent: 3000,
                nulled: 5,
                deficit: 7,
            }),
        };

        // 1.05^10 * 10 - 10 = 6.29 -> 6
        assert_eq!(stats.penalty(), 3 + 6 + 7 + 10);
    }

    #[test]
    fn deserializes_lavalink_stats_payload() {
        let json = r#"{
            "players": 1,
            "playingPlayers": 1,
            "uptime": 123456,
            "memory": {"free": 1, "used": 2, "allocated": 3, "reservable": 4},
            "cpu": {"cores": 2, "systemLoad": 0.0, "lavalinkLoad": 0.0}
        }"#;

        let stats: NodeStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.players, 1);
        assert_eq!(stats.frame_stats, None);
        assert_eq!(stats.penalty(), 1);
    }
}
