use relay_dispatcher::{ApiKeyService, Groups};
use relay_storage::{ApiKey, GroupId, Team};

fn print_key(key: &ApiKey) {
    println!(
        "  {} (group {}, created {}) {}",
        key.team,
        key.group_id,
        key.created_at.format("%Y-%m-%d %H:%M:%S"),
        key.key.to_hex()
    );
}

pub async fn cmd_keys_init(
    svc: &ApiKeyService,
    team: &str,
    group: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = svc.create_team(&Team::new(team), &GroupId::new(group)).await?;
    println!("✓ Team {} created, owned by group {}", key.team, key.group_id);
    println!("{}", key.key.to_hex());
    Ok(())
}

pub async fn cmd_keys_list(
    svc: &ApiKeyService,
    groups: &Groups,
) -> Result<(), Box<dyn std::error::Error>> {
    let keys = svc.visible_keys(groups).await?;
    if keys.is_empty() {
        println!("No keys found.");
    } else {
        println!("Keys:");
        for key in &keys {
            print_key(key);
        }
    }
    Ok(())
}

pub async fn cmd_keys_show(
    svc: &ApiKeyService,
    team: &str,
    groups: &Groups,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let keys = svc.team_keys(&Team::new(team), groups, limit).await?;
    println!("Keys for {team}, newest first:");
    for key in &keys {
        print_key(key);
    }
    Ok(())
}

pub async fn cmd_keys_rotate(
    svc: &ApiKeyService,
    team: &str,
    groups: &Groups,
) -> Result<(), Box<dyn std::error::Error>> {
    let keys = svc.rotate_team_key(&Team::new(team), groups).await?;
    println!("✓ Key rotated for {team}. Old keys stay valid until purged.");
    if let Some(newest) = keys.first() {
        println!("{}", newest.key.to_hex());
    }
    Ok(())
}

pub async fn cmd_keys_purge(
    svc: &ApiKeyService,
    team: &str,
    groups: &Groups,
) -> Result<(), Box<dyn std::error::Error>> {
    let removed = svc.purge_team_keys(&Team::new(team), groups).await?;
    println!("✓ Purged {removed} old key(s) for {team}");
    Ok(())
}

pub async fn cmd_teams(
    svc: &ApiKeyService,
    groups: &Groups,
) -> Result<(), Box<dyn std::error::Error>> {
    let teams = svc.teams(groups).await?;
    if teams.is_empty() {
        println!("No teams found.");
    } else {
        println!("Teams:");
        for membership in teams {
            println!("  {} (group {})", membership.team, membership.group_id);
        }
    }
    Ok(())
}
