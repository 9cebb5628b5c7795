use proptest::prelude::*;
use raft_session_client::{MemberSelector, MemberSelectorManager};
use raft_session_core::{CommunicationStrategy, MemberId};

fn member_ids() -> impl Strategy<Value = Vec<MemberId>> {
    prop::collection::vec(0u8..8, 0..8)
        .prop_map(|ids| ids.into_iter().map(|id| MemberId::new(format!("m{}", id))).collect())
}

fn leader_id() -> impl Strategy<Value = Option<MemberId>> {
    prop::option::of(0u8..10).prop_map(|id| id.map(|id| MemberId::new(format!("m{}", id))))
}

fn strategy() -> impl Strategy<Value = CommunicationStrategy> {
    prop_oneof![
        Just(CommunicationStrategy::Any),
        Just(CommunicationStrategy::Leader),
        Just(CommunicationStrategy::Followers),
    ]
}

fn unique(members: &[MemberId]) -> Vec<MemberId> {
    let mut seen = Vec::new();
    for member in members {
        if !seen.contains(member) {
            seen.push(member.clone());
        }
    }
    seen
}

fn drain(selector: &mut MemberSelector) -> Vec<MemberId> {
    let mut pass = Vec::new();
    while selector.has_next() {
        pass.push(selector.next().unwrap());
    }
    pass
}

fn expected(
    strategy: CommunicationStrategy,
    leader: &Option<MemberId>,
    members: &[MemberId],
) -> Vec<MemberId> {
    let leader = leader.as_ref().filter(|leader| members.contains(leader));
    match (strategy, leader) {
        (CommunicationStrategy::Leader, Some(leader)) => vec![leader.clone()],
        (CommunicationStrategy::Followers, Some(leader)) => {
            members.iter().filter(|m| *m != leader).cloned().collect()
        }
        _ => members.to_vec(),
    }
}

proptest! {
    /// Every selector reflects the latest view, whatever came before it.
    #[test]
    fn prop_selectors_follow_latest_view(
        strategy in strategy(),
        views in prop::collection::vec((leader_id(), member_ids()), 1..5),
        consumed in 0usize..4,
    ) {
        let manager = MemberSelectorManager::new();
        let mut selector = manager.create_selector(strategy);

        for (leader, members) in &views {
            for _ in 0..consumed {
                if selector.has_next() {
                    selector.next().unwrap();
                }
            }
            manager.reset_all(leader.clone(), members.clone());
        }

        let (leader, members) = views.last().unwrap();
        let members = unique(members);
        prop_assert_eq!(selector.members(), members.clone());
        prop_assert_eq!(drain(&mut selector), expected(strategy, leader, &members));
    }

    /// A pass yields each candidate exactly once and never one outside the view.
    #[test]
    fn prop_pass_is_exact(
        strategy in strategy(),
        leader in leader_id(),
        members in member_ids(),
    ) {
        let manager = MemberSelectorManager::new();
        manager.reset_all(leader, members.clone());
        let mut selector = manager.create_selector(strategy);
        let members = unique(&members);

        let pass = drain(&mut selector);
        prop_assert_eq!(unique(&pass).len(), pass.len());
        prop_assert!(pass.iter().all(|m| members.contains(m)));
        if strategy == CommunicationStrategy::Any {
            prop_assert_eq!(pass.len(), members.len());
        }

        selector.reset();
        prop_assert_eq!(drain(&mut selector), pass);
    }

    /// Without a leader among the members every strategy covers all members.
    #[test]
    fn prop_no_leader_falls_back(strategy in strategy(), members in member_ids()) {
        let manager = MemberSelectorManager::new();
        manager.reset_all(Some(MemberId::from("outsider")), members.clone());
        let mut selector = manager.create_selector(strategy);

        prop_assert!(selector.leader().is_none());
        prop_assert_eq!(drain(&mut selector), unique(&members));
    }
}
