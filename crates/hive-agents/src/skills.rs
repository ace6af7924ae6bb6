//! Per-department skill catalogs.
//!
//! Each department has a small fixed catalog; the executor consults it
//! for mana gating and damage resolution, and resolves the strategies'
//! `"auto"` placeholder to the cheapest castable skill. Unknown skill
//! ids fall back to [`DEFAULT_SKILL_MP_COST`] so mana gating still
//! applies to garbage input.

use hive_types::Department;

/// Mana charged for skill ids that are not in any catalog.
pub const DEFAULT_SKILL_MP_COST: u32 = 50;

/// One castable skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    /// Skill identifier as it appears in commands and logs.
    pub id: &'static str,
    /// The department that teaches it.
    pub department: Department,
    /// Mana cost per cast.
    pub mp_cost: u32,
    /// Cooldown in seconds.
    pub cooldown_secs: u32,
    /// Base power (damage, or healing for qigong).
    pub power: u32,
    /// Range in world units.
    pub range: u32,
}

/// The full skill table, grouped by department.
const CATALOG: [Skill; 12] = [
    // 劍術 -- close-range burst.
    skill("斬擊", Department::Sword, 30, 0, 120, 1),
    skill("破空", Department::Sword, 50, 5, 200, 2),
    skill("聖光斬", Department::Sword, 100, 15, 350, 3),
    // 弓術 -- ranged sustained damage.
    skill("穿雲箭", Department::Bow, 25, 0, 100, 8),
    skill("連珠箭", Department::Bow, 45, 4, 180, 7),
    skill("箭雨", Department::Bow, 90, 12, 300, 6),
    // 格鬥 -- combo pressure.
    skill("連環拳", Department::Martial, 20, 0, 90, 1),
    skill("破甲擊", Department::Martial, 40, 6, 170, 1),
    skill("怒火燎原", Department::Martial, 85, 14, 320, 2),
    // 氣功 -- support and recovery.
    skill("治癒術", Department::Qigong, 35, 3, 150, 5),
    skill("氣盾", Department::Qigong, 50, 8, 0, 5),
    skill("回春術", Department::Qigong, 80, 20, 280, 5),
];

/// Const constructor keeping the table terse.
const fn skill(
    id: &'static str,
    department: Department,
    mp_cost: u32,
    cooldown_secs: u32,
    power: u32,
    range: u32,
) -> Skill {
    Skill {
        id,
        department,
        mp_cost,
        cooldown_secs,
        power,
        range,
    }
}

/// All skills taught by a department.
pub fn catalog(department: Department) -> impl Iterator<Item = &'static Skill> {
    CATALOG.iter().filter(move |s| s.department == department)
}

/// Look up a skill by id within a department's catalog.
pub fn lookup(department: Department, skill_id: &str) -> Option<&'static Skill> {
    catalog(department).find(|s| s.id == skill_id)
}

/// The cheapest skill a department teaches, used to resolve the
/// strategies' `"auto"` placeholder.
pub fn cheapest(department: Department) -> Option<&'static Skill> {
    catalog(department).min_by_key(|s| s.mp_cost)
}

/// The mana cost of casting `skill_id` as a member of `department`.
///
/// Unknown ids cost [`DEFAULT_SKILL_MP_COST`].
pub fn mp_cost(department: Department, skill_id: &str) -> u32 {
    lookup(department, skill_id).map_or(DEFAULT_SKILL_MP_COST, |s| s.mp_cost)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn every_department_has_three_skills() {
        for department in Department::ALL {
            assert_eq!(catalog(department).count(), 3, "{department:?}");
        }
    }

    #[test]
    fn lookup_is_department_scoped() {
        assert!(lookup(Department::Sword, "斬擊").is_some());
        assert!(lookup(Department::Bow, "斬擊").is_none());
    }

    #[test]
    fn cheapest_picks_lowest_cost() {
        let skill = cheapest(Department::Martial).unwrap();
        assert_eq!(skill.id, "連環拳");
        assert_eq!(skill.mp_cost, 20);
    }

    #[test]
    fn unknown_skill_costs_default() {
        assert_eq!(mp_cost(Department::Sword, "x"), DEFAULT_SKILL_MP_COST);
        assert_eq!(mp_cost(Department::Sword, "破空"), 50);
    }
}
