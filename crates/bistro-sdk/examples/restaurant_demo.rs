//! 本地演示：使用内存后端走一遍顾客端与员工端的主要流程
//!
//! 运行：cargo run --example restaurant_demo

use std::sync::Arc;

use bistro_sdk::backend::BackendOp;
use bistro_sdk::entities::{Announcement, EmployeeRole, NewAnnouncement};
use bistro_sdk::{BackendClient, BistroConfig, BistroSDK, ListScope, MemoryBackend, NewEmployee};
use serde_json::json;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🍽️ Bistro SDK 演示\n");

    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        "announcements",
        vec![
            json!({"title": "Live jazz on Friday", "content": "8pm until late", "is_active": true, "display_order": 2}),
            json!({"title": "New brunch menu", "content": "Weekends from 10am", "is_active": true, "display_order": 1}),
            json!({"title": "Closed for renovation", "content": "Old notice", "is_active": false, "display_order": 0}),
        ],
    );

    let config = BistroConfig::builder()
        .backend_url("http://localhost:54321")
        .anon_key("demo-anon-key")
        .employee_initial_password("Welcome123")
        .build();
    let sdk = BistroSDK::initialize_with_client(config, BackendClient::in_memory(backend.clone())).await?;

    let mut events = sdk.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("   📨 事件: {}", event.event_type());
        }
    });

    // 1. 顾客端列表
    println!("📋 步骤 1: 顾客端公告");
    let visible = sdk.entity_hook::<Announcement>(ListScope::Visible);
    visible.activate().await?;
    for item in visible.data() {
        println!("   #{} {}", item.display_order, item.title);
    }

    // 2. 管理端新增与软删除
    println!("\n✏️ 步骤 2: 管理端编辑");
    let editor = sdk.entity_hook::<Announcement>(ListScope::Editor);
    editor.activate().await?;
    let created = editor
        .add(NewAnnouncement {
            title: "Chef's tasting night".to_string(),
            content: "Seven courses, limited seats".to_string(),
            image_url: None,
            is_active: true,
            display_order: 3,
        })
        .await?;
    println!("   管理端共 {} 条，新增 {}", editor.data().len(), created.title);
    editor.remove(created.id).await?;
    visible.refresh().await?;
    println!("   软删除后顾客端剩余 {} 条", visible.data().len());

    // 3. 员工开通，第二次模拟资料写入失败
    println!("\n👤 步骤 3: 员工开通");
    let provisioner = sdk.provisioner()?;
    let profile = provisioner
        .provision(NewEmployee {
            username: "maria".to_string(),
            full_name: "Maria Lopez".to_string(),
            email: "Maria@Bistro.example".to_string(),
            role: EmployeeRole::Manager,
            job_title: Some("Floor manager".to_string()),
            phone: None,
        })
        .await?;
    println!("   ✅ 已开通 {} ({})", profile.full_name, profile.id);

    backend.fail_next(BackendOp::Insert, 1);
    let failed = provisioner
        .provision(NewEmployee {
            username: "tom".to_string(),
            full_name: "Tom Reed".to_string(),
            email: "tom@bistro.example".to_string(),
            role: EmployeeRole::Staff,
            job_title: None,
            phone: None,
        })
        .await;
    println!("   ❌ 第二次开通失败: {}", failed.is_err());
    println!("   账号数量: {}", backend.user_count());

    // 4. 积分
    println!("\n🎁 步骤 4: 顾客积分");
    let ledger = sdk.rewards_ledger(Uuid::new_v4());
    ledger.award(150, "Dinner for two").await?;
    ledger.redeem(100, "Free dessert").await?;
    println!("   当前余额: {}", ledger.balance());

    // 5. 切后台再回前台
    println!("\n📱 步骤 5: 生命周期");
    sdk.track(visible.lifecycle_handle()).await;
    sdk.enter_background().await?;
    println!("   后台时订阅中: {}", visible.is_listening());
    sdk.enter_foreground().await?;
    println!("   回到前台订阅中: {}", visible.is_listening());

    visible.deactivate().await;
    editor.deactivate().await;
    sdk.shutdown().await?;
    println!("\n✅ 演示结束");
    Ok(())
}
