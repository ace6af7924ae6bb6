//! Spawn generation: academy-themed names, flavor text, traits, and
//! department-tuned vitals for freshly created agents.
//!
//! Name pools follow the academy themes and every entry stays within
//! the six-code-point display limit, so generated names never violate
//! the registry's name invariant.

use chrono::Utc;
use rand::Rng;

use hive_types::{
    Academy, Agent, AgentId, Department, LearningState, LifecycleState, Pose, Position, ShardId,
    StrategyKind, Traits, Vitals,
};

/// What a spawn request asks for; the registry picks the shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnProfile {
    /// Academy for naming and flavor.
    pub academy: Academy,
    /// Department for vitals and skills.
    pub department: Department,
    /// Team to join; 0 = unaffiliated.
    pub team_id: u32,
    /// Starting level.
    pub level: u32,
    /// Strategy driving the new agent.
    pub strategy: StrategyKind,
}

/// 聖門: God-series, solemn and holy.
const SEONGMUN_NAMES: [&str; 12] = [
    "God戰", "God光", "God力", "God威", "God聖", "God護", "God劍", "God箭", "God拳", "God義",
    "God仁", "God慈",
];

/// 懸岩: ink-wash series, poetic and reserved.
const HYONRYON_NAMES: [&str; 12] = [
    "水墨風", "水墨畫", "水墨詩", "水墨夢", "水墨雲", "水墨月", "水墨雨", "水墨雪", "水墨山",
    "水墨竹", "水墨蘭", "水墨梅",
];

/// 鳳凰: heart-series, emotional and fiery.
const BONGCHEON_NAMES: [&str; 12] = [
    "心中有愛", "心中有夢", "心中有火", "心中有光", "心如烈火", "心如鳳凰", "心懷夢想",
    "心懷熱情", "心懷勇氣", "心懷希望", "心被感動", "心被震撼",
];

/// Personality pools per academy.
const SEONGMUN_PERSONALITIES: [&str; 5] =
    ["神聖威嚴", "正義守護", "光明庇佑", "仁慈威嚴", "聖潔高貴"];
const HYONRYON_PERSONALITIES: [&str; 5] =
    ["水墨雅致", "詩意飄逸", "文雅內斂", "寧靜致遠", "淡泊明志"];
const BONGCHEON_PERSONALITIES: [&str; 5] =
    ["情感豐富", "熱情似火", "心懷大愛", "感情真摯", "情深意重"];

/// Combat style pools per department.
const SWORD_STYLES: [&str; 5] = ["近戰主坦", "劍術精通", "攻守兼備", "快劍如風", "重劍無鋒"];
const BOW_STYLES: [&str; 5] = ["遠程狙擊", "精準射擊", "快速連射", "爆發輸出", "百步穿楊"];
const MARTIAL_STYLES: [&str; 5] = ["近身格鬥", "連擊專家", "暴擊流", "體術大師", "鐵拳無敵"];
const QIGONG_STYLES: [&str; 5] = ["治療輔助", "群體增益", "精神控制", "內功深厚", "回復大師"];

/// Signature lines per academy, shared across departments.
const SEONGMUN_LINES: [&str; 4] = ["God之劍威！", "神聖審判！", "聖光庇護！", "God威無敵！"];
const HYONRYON_LINES: [&str; 4] = ["水墨劍舞！", "詩劍飄逸！", "雅射無聲！", "文武雙全！"];
const BONGCHEON_LINES: [&str; 4] = ["心劍合一！", "情劍飛舞！", "心中烈火！", "愛的力量！"];

/// Generate a display name for the academy; always ≤ 6 code points.
pub fn generate_name(academy: Academy, rng: &mut dyn rand::RngCore) -> String {
    let pool: &[&str] = match academy {
        Academy::Seongmun => &SEONGMUN_NAMES,
        Academy::Hyonryon => &HYONRYON_NAMES,
        Academy::Bongcheon => &BONGCHEON_NAMES,
    };
    let name = pick(pool, rng);
    debug_assert!(name.chars().count() <= 6);
    name.to_owned()
}

/// Roll the behavioral trait vector.
///
/// Departments nudge the distribution: martial and sword agents skew
/// aggressive, qigong agents skew social.
pub fn generate_traits(department: Department, rng: &mut dyn rand::RngCore) -> Traits {
    let roll = |rng: &mut dyn rand::RngCore, low: f64, high: f64| rng.random_range(low..high);
    match department {
        Department::Sword | Department::Martial => Traits {
            aggression: roll(rng, 0.5, 1.0),
            intelligence: roll(rng, 0.2, 0.8),
            sociability: roll(rng, 0.1, 0.7),
        },
        Department::Bow => Traits {
            aggression: roll(rng, 0.4, 0.9),
            intelligence: roll(rng, 0.4, 0.9),
            sociability: roll(rng, 0.1, 0.6),
        },
        Department::Qigong => Traits {
            aggression: roll(rng, 0.1, 0.5),
            intelligence: roll(rng, 0.4, 1.0),
            sociability: roll(rng, 0.5, 1.0),
        },
    }
}

/// Department- and level-tuned starting vitals.
pub fn starting_vitals(department: Department, level: u32) -> Vitals {
    let level_bonus = level.saturating_sub(1);
    let (base_hp, base_mp) = match department {
        Department::Sword => (1200_u32, 400_u32),
        Department::Bow => (900, 500),
        Department::Martial => (1100, 350),
        Department::Qigong => (800, 700),
    };
    let max_hp = base_hp.saturating_add(level_bonus.saturating_mul(50));
    let max_mp = base_mp.saturating_add(level_bonus.saturating_mul(30));
    Vitals {
        hp: max_hp,
        max_hp,
        mp: max_mp,
        max_mp,
        level,
        xp: 0,
    }
}

/// Build a complete agent record from a spawn profile.
///
/// The shard is chosen by the caller (the registry consults the
/// balancer) and threaded in here so the record is born consistent.
pub fn generate_agent(
    profile: &SpawnProfile,
    shard_id: ShardId,
    rng: &mut dyn rand::RngCore,
) -> Agent {
    let now = Utc::now();
    let (personalities, lines): (&[&str], &[&str]) = match profile.academy {
        Academy::Seongmun => (&SEONGMUN_PERSONALITIES, &SEONGMUN_LINES),
        Academy::Hyonryon => (&HYONRYON_PERSONALITIES, &HYONRYON_LINES),
        Academy::Bongcheon => (&BONGCHEON_PERSONALITIES, &BONGCHEON_LINES),
    };
    let styles: &[&str] = match profile.department {
        Department::Sword => &SWORD_STYLES,
        Department::Bow => &BOW_STYLES,
        Department::Martial => &MARTIAL_STYLES,
        Department::Qigong => &QIGONG_STYLES,
    };

    Agent {
        id: AgentId::new(),
        name: generate_name(profile.academy, rng),
        academy: profile.academy,
        department: profile.department,
        team_id: profile.team_id,
        shard_id,
        vitals: starting_vitals(profile.department, profile.level),
        pose: Pose {
            position: Position::new(
                rng.random_range(-100.0..100.0),
                rng.random_range(-100.0..100.0),
                0.0,
            ),
            facing: rng.random_range(0.0..360.0),
            map_id: 1,
        },
        traits: generate_traits(profile.department, rng),
        state: LifecycleState::Idle,
        strategy: profile.strategy,
        personality: pick(personalities, rng).to_owned(),
        combat_style: pick(styles, rng).to_owned(),
        signature_line: pick(lines, rng).to_owned(),
        created_at: now,
        last_tick_at: None,
        last_db_sync_at: None,
        dirty: true,
        learning: LearningState::default(),
    }
}

/// Uniform pick from a non-empty pool.
fn pick<'a>(pool: &[&'a str], rng: &mut dyn rand::RngCore) -> &'a str {
    let index = rng.random_range(0..pool.len().max(1));
    pool.get(index).copied().unwrap_or("無名")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn names_respect_six_code_points() {
        let mut rng = StdRng::seed_from_u64(42);
        for academy in Academy::ALL {
            for _ in 0..50 {
                let name = generate_name(academy, &mut rng);
                assert!(name.chars().count() <= 6, "{name} too long");
            }
        }
    }

    #[test]
    fn traits_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for department in Department::ALL {
            for _ in 0..50 {
                assert!(generate_traits(department, &mut rng).in_bounds());
            }
        }
    }

    #[test]
    fn qigong_has_most_mana() {
        let qigong = starting_vitals(Department::Qigong, 1);
        let sword = starting_vitals(Department::Sword, 1);
        assert!(qigong.max_mp > sword.max_mp);
        assert!(sword.max_hp > qigong.max_hp);
    }

    #[test]
    fn vitals_scale_with_level() {
        let low = starting_vitals(Department::Bow, 1);
        let high = starting_vitals(Department::Bow, 10);
        assert!(high.max_hp > low.max_hp);
        assert_eq!(high.hp, high.max_hp);
    }

    #[test]
    fn generated_agent_is_consistent() {
        let mut rng = StdRng::seed_from_u64(3);
        let profile = SpawnProfile {
            academy: Academy::Bongcheon,
            department: Department::Qigong,
            team_id: 9,
            level: 5,
            strategy: StrategyKind::Hybrid,
        };
        let agent = generate_agent(&profile, ShardId(2), &mut rng);
        assert_eq!(agent.team_id, 9);
        assert_eq!(agent.shard_id, ShardId(2));
        assert_eq!(agent.state, LifecycleState::Idle);
        assert!(agent.dirty);
        assert_eq!(agent.vitals.level, 5);
        assert!(!agent.personality.is_empty());
        assert!(!agent.signature_line.is_empty());
    }
}
