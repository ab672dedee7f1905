#[macro_use]
mod common;

use actix_web::test;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use common::*;

#[actix_web::test]
async fn signup_verify_and_login() {
    let ctx = context().await;
    let app = init_app!(ctx.state);

    let (status, created) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/signup").set_json(json!({
            "name": "Grace",
            "surname": "Hopper",
            "email": "Grace@Example.com",
            "phoneNum": "+48111222333",
            "password": "compilers-rule",
        })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(created["email"], "grace@example.com");
    assert_eq!(created["role"], "ROLE_USER");

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "grace@example.com", "password": "compilers-rule" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Account not verified. Please verify your account");

    let (status, body) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/verify").set_json(json!({
            "email": "grace@example.com",
            "verificationCode": "000000",
        })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Invalid verification code");

    let (status, _) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/verify").set_json(json!({
            "email": "grace@example.com",
            "verificationCode": created["code"],
        })),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "grace@example.com", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(body["message"], "Invalid email or password");

    let token = login(&app, "grace@example.com", "compilers-rule").await;
    let (status, session) = call_json(
        &app,
        test::TestRequest::get().uri("/api/auth/session").insert_header(bearer(&token)),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(session["valid"], true);
    assert_eq!(session["name"], "Grace Hopper");

    let (status, profile) = call_json(
        &app,
        test::TestRequest::get().uri("/api/users/profile").insert_header(bearer(&token)),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(profile["phoneNum"], "+48111222333");
}

#[actix_web::test]
async fn duplicate_signup_conflicts_and_bad_input_is_listed() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    customer_token(&app, "ada@example.com").await;

    let (status, body) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/signup").set_json(json!({
            "name": "Ada",
            "surname": "Byron",
            "email": "ada@example.com",
            "phoneNum": "+48500600700",
            "password": "another-password",
        })),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["message"], "Email 'ada@example.com' is already registered");

    let (status, body) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/signup").set_json(json!({
            "name": "Mary",
            "surname": "Somerville",
            "email": "mary@example.com",
            "phoneNum": "",
            "password": "mechanism-of-heavens",
        })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Phone number is required");

    let (status, body) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/signup").set_json(json!({
            "name": "",
            "surname": "Byron",
            "email": "not-an-email",
            "password": "short",
        })),
    )
    .await;
    assert_eq!(status, 400);
    let message = body["message"].as_str().unwrap_or_default();
    assert!(message.contains("; "), "expected several problems, got {message}");
}

#[actix_web::test]
async fn protected_endpoints_need_a_token_and_the_right_role() {
    let ctx = context().await;
    let app = init_app!(ctx.state);

    let (status, _) = call_json(&app, test::TestRequest::get().uri("/api/appointments/my")).await;
    assert_eq!(status, 401);

    let (status, _) = call_json(
        &app,
        test::TestRequest::get()
            .uri("/api/appointments/my")
            .insert_header(bearer("not-a-token")),
    )
    .await;
    assert_eq!(status, 401);

    let customer = customer_token(&app, "ada@example.com").await;
    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/services")
            .insert_header(bearer(&customer))
            .set_json(json!({ "name": "Lash Lift", "minDuration": 60, "price": 150.0 })),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["message"], "Access denied: Admin access required");

    let (status, _) = call_json(
        &app,
        test::TestRequest::get().uri("/api/availability/all").insert_header(bearer(&customer)),
    )
    .await;
    assert_eq!(status, 403);
}

#[actix_web::test]
async fn slots_reject_bad_windows_and_overlaps() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    let admin = admin_token(&app).await;
    let service = create_service(&app, &admin, "Evening Makeup").await;

    create_slot(&app, &admin, &service, future(2, 10)).await;

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/availability")
            .insert_header(bearer(&admin))
            .set_json(slot_body(&service, future(2, 10) + chrono::Duration::minutes(30), 60)),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["message"], "Time slot overlaps with existing availability");

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/availability")
            .insert_header(bearer(&admin))
            .set_json(slot_body(&service, future(-2, 10), 60)),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Cannot create slots in the past");

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/availability")
            .insert_header(bearer(&admin))
            .set_json(slot_body(&service, future(3, 10), -30)),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Start time must be before end time");

    // Back-to-back slots do not overlap.
    create_slot(&app, &admin, &service, future(2, 11)).await;

    let (status, slots) = call_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/availability/service/{service}")),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(slots.as_array().map(Vec::len), Some(2));
}

#[actix_web::test]
async fn booking_lifecycle() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    let admin = admin_token(&app).await;
    let customer = customer_token(&app, "ada@example.com").await;
    let service = create_service(&app, &admin, "Bridal Makeup").await;
    let other_service = create_service(&app, &admin, "Brow Shaping").await;
    let first = create_slot(&app, &admin, &service, future(3, 9)).await;
    let second = create_slot(&app, &admin, &service, future(4, 9)).await;
    let unrelated = create_slot(&app, &admin, &other_service, future(5, 9)).await;

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&customer))
            .set_json(json!({ "slotId": first, "serviceId": service, "location": "   " })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Location is required");

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&customer))
            .set_json(json!({ "slotId": first, "serviceId": other_service, "location": "Hotel Bristol" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Service mismatch with selected slot");

    let (status, booked) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&customer))
            .set_json(json!({
                "slotId": first,
                "serviceId": service,
                "location": "Hotel Bristol",
                "description": "Two bridesmaids as well",
            })),
    )
    .await;
    assert_eq!(status, 201, "{booked}");
    assert_eq!(booked["status"], "CONFIRMED");
    assert_eq!(booked["slotId"], first.as_str());
    let appointment = booked["appointmentId"].as_str().expect("id").to_string();

    let (_, open) = call_json(&app, test::TestRequest::get().uri(&format!("/api/availability/{first}/check"))).await;
    assert_eq!(open, json!(false));

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&customer))
            .set_json(json!({ "slotId": first, "serviceId": service, "location": "Elsewhere" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Slot is not available for booking");

    let (status, body) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/reschedule"))
            .insert_header(bearer(&customer))
            .set_json(json!({ "newSlotId": unrelated, "serviceId": service })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Service mismatch");

    let (status, moved) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/reschedule"))
            .insert_header(bearer(&customer))
            .set_json(json!({ "newSlotId": second, "serviceId": service })),
    )
    .await;
    assert_eq!(status, 200, "{moved}");
    assert_eq!(moved["slotId"], second.as_str());

    let (_, open) = call_json(&app, test::TestRequest::get().uri(&format!("/api/availability/{first}/check"))).await;
    assert_eq!(open, json!(true));

    let someone_else = customer_token(&app, "eve@example.com").await;
    let (status, _) = call_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/appointments/{appointment}"))
            .insert_header(bearer(&someone_else)),
    )
    .await;
    assert_eq!(status, 403);
    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/cancel"))
            .insert_header(bearer(&someone_else)),
    )
    .await;
    assert_eq!(status, 403);

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/cancel"))
            .insert_header(bearer(&customer)),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/cancel"))
            .insert_header(bearer(&customer)),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Appointment is already cancelled");

    let (_, open) = call_json(&app, test::TestRequest::get().uri(&format!("/api/availability/{second}/check"))).await;
    assert_eq!(open, json!(true));

    let (status, body) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/reschedule"))
            .insert_header(bearer(&customer))
            .set_json(json!({ "newSlotId": first, "serviceId": service })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Cannot reschedule a cancelled appointment");

    let (status, mine) = call_json(
        &app,
        test::TestRequest::get().uri("/api/appointments/my").insert_header(bearer(&customer)),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(mine[0]["status"], "CANCELLED");
}

#[actix_web::test]
async fn admin_status_changes() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    let admin = admin_token(&app).await;
    let customer = customer_token(&app, "ada@example.com").await;
    let service = create_service(&app, &admin, "Lash Lift").await;
    let slot = create_slot(&app, &admin, &service, future(1, 15)).await;

    let (_, booked) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&customer))
            .set_json(json!({ "slotId": slot, "serviceId": service, "location": "Studio 4" })),
    )
    .await;
    let appointment = booked["appointmentId"].as_str().expect("id").to_string();

    let (status, body) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/status"))
            .insert_header(bearer(&admin))
            .set_json(json!({ "status": "no_show" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Status 'NO_SHOW' not found");

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/status"))
            .insert_header(bearer(&customer))
            .set_json(json!({ "status": "completed" })),
    )
    .await;
    assert_eq!(status, 403);

    let (status, updated) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/status"))
            .insert_header(bearer(&admin))
            .set_json(json!({ "status": "completed" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(updated["status"], "COMPLETED");

    let (status, all) = call_json(
        &app,
        test::TestRequest::get().uri("/api/appointments").insert_header(bearer(&admin)),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(all.as_array().map(Vec::len), Some(1));

    let (status, body) = call_json(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/api/availability/{slot}"))
            .insert_header(bearer(&admin)),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Cannot delete a booked slot");

    let (status, body) = call_json(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/api/services/{service}"))
            .insert_header(bearer(&admin)),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["message"], "Service is still used by availability slots or appointments");
}

#[actix_web::test]
async fn connected_calendar_follows_bookings() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    let admin = admin_token(&app).await;
    let customer = customer_token(&app, "ada@example.com").await;
    let service = create_service(&app, &admin, "Evening Makeup").await;
    let slot = create_slot(&app, &admin, &service, future(2, 18)).await;

    let (status, connected) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/users/google-calendar/token")
            .insert_header(bearer(&customer))
            .set_json(json!({ "accessToken": "ya29.token", "expiresIn": 3600, "accountEmail": "ada@gmail.com" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(connected["isConnected"], true);

    let (_, booked) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&customer))
            .set_json(json!({ "slotId": slot, "serviceId": service, "location": "Opera house" })),
    )
    .await;
    let appointment = booked["appointmentId"].as_str().expect("id").to_string();
    assert_eq!(ctx.calendar.calls(), vec!["create Evening Makeup appointment evt-1".to_string()]);

    let (status, sync) = call_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/calendar/sync-status/{appointment}"))
            .insert_header(bearer(&customer)),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(sync["isSynced"], true);

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{appointment}/cancel"))
            .insert_header(bearer(&customer)),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(ctx.calendar.calls().last().map(String::as_str), Some("delete evt-1"));

    let (status, _) = call_json(
        &app,
        test::TestRequest::delete()
            .uri("/api/calendar/google/disconnect")
            .insert_header(bearer(&customer)),
    )
    .await;
    assert!(status == 200 || status == 204);

    let (_, result) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments/sync-all-to-calendar")
            .insert_header(bearer(&customer)),
    )
    .await;
    assert_eq!(result["success"], false);
    assert_eq!(result["message"], "Calendar not connected");
}

#[actix_web::test]
async fn google_signup_then_oauth_login() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer good-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email": "Lin@Example.com",
            "given_name": "Lin",
            "family_name": "Chen",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let ctx = context_with_identity(&server.uri()).await;
    let app = init_app!(ctx.state);

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/oauth/authenticate")
            .set_json(json!({ "provider": "google", "accessToken": "good-token" })),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["message"], "User not found. Please sign up first.");

    let (status, created) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/signup/google")
            .set_json(json!({ "accessToken": "good-token" })),
    )
    .await;
    assert_eq!(status, 201, "{created}");
    assert_eq!(created["email"], "lin@example.com");
    assert_eq!(created["surname"], "Chen");

    let (status, session) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/oauth/authenticate")
            .set_json(json!({ "provider": "GOOGLE", "accessToken": "good-token" })),
    )
    .await;
    assert_eq!(status, 200);
    assert!(session["token"].as_str().is_some_and(|token| !token.is_empty()));

    let (status, _) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/oauth/authenticate")
            .set_json(json!({ "provider": "google", "accessToken": "stale-token" })),
    )
    .await;
    assert_eq!(status, 401);

    let (status, body) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/oauth/authenticate")
            .set_json(json!({ "provider": "myspace", "accessToken": "good-token" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Invalid provider");
}

#[actix_web::test]
async fn closed_appointments_never_free_a_rebooked_slot() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    let admin = admin_token(&app).await;
    let first = customer_token(&app, "ada@example.com").await;
    let second = customer_token(&app, "grace@example.com").await;
    let third = customer_token(&app, "mary@example.com").await;
    let service = create_service(&app, &admin, "Evening Makeup").await;
    let slot = create_slot(&app, &admin, &service, future(2, 16)).await;
    let booking = json!({ "slotId": slot, "serviceId": service, "location": "Opera house" });

    let (_, booked) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&first))
            .set_json(booking.clone()),
    )
    .await;
    let cancelled = booked["appointmentId"].as_str().expect("id").to_string();
    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{cancelled}/cancel"))
            .insert_header(bearer(&first)),
    )
    .await;
    assert_eq!(status, 200);

    let (status, rebooked) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&second))
            .set_json(booking.clone()),
    )
    .await;
    assert_eq!(status, 201, "{rebooked}");
    let holder = rebooked["appointmentId"].as_str().expect("id").to_string();

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{cancelled}/status"))
            .insert_header(bearer(&admin))
            .set_json(json!({ "status": "CANCELLED" })),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{cancelled}/status"))
            .insert_header(bearer(&admin))
            .set_json(json!({ "status": "CONFIRMED" })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Cannot reopen a cancelled appointment");

    let (_, open) = call_json(&app, test::TestRequest::get().uri(&format!("/api/availability/{slot}/check"))).await;
    assert_eq!(open, json!(false));

    let (status, _) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&third))
            .set_json(booking),
    )
    .await;
    assert_eq!(status, 400);

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{holder}/status"))
            .insert_header(bearer(&admin))
            .set_json(json!({ "status": "COMPLETED" })),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{holder}/cancel"))
            .insert_header(bearer(&second)),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Cannot cancel a completed appointment");

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/appointments/{holder}/status"))
            .insert_header(bearer(&admin))
            .set_json(json!({ "status": "CANCELLED" })),
    )
    .await;
    assert_eq!(status, 200);

    let (_, open) = call_json(&app, test::TestRequest::get().uri(&format!("/api/availability/{slot}/check"))).await;
    assert_eq!(open, json!(false));
}

fn stamp(time: chrono::NaiveDateTime) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn slot_ids(slots: &serde_json::Value) -> Vec<String> {
    slots
        .as_array()
        .map(|slots| {
            slots
                .iter()
                .filter_map(|slot| slot["slotId"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[actix_web::test]
async fn slot_updates_and_manual_booking() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    let admin = admin_token(&app).await;
    let service = create_service(&app, &admin, "Evening Makeup").await;
    let morning = create_slot(&app, &admin, &service, future(3, 10)).await;
    create_slot(&app, &admin, &service, future(3, 12)).await;

    // Moving a slot may overlap its own old position.
    let moved = future(3, 10) + chrono::Duration::minutes(30);
    let (status, updated) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/availability/{morning}"))
            .insert_header(bearer(&admin))
            .set_json(slot_body(&service, moved, 60)),
    )
    .await;
    assert_eq!(status, 200, "{updated}");
    assert_eq!(updated["startTime"], stamp(moved));

    let (status, body) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/availability/{morning}"))
            .insert_header(bearer(&admin))
            .set_json(slot_body(&service, future(3, 11) + chrono::Duration::minutes(30), 60)),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["message"], "Time slot overlaps with existing availability");

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/availability/{morning}/book"))
            .insert_header(bearer(&admin)),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/availability/{morning}/book"))
            .insert_header(bearer(&admin)),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Slot is already booked");

    let (_, free) = call_json(&app, test::TestRequest::get().uri(&format!("/api/availability/{morning}/check"))).await;
    assert_eq!(free, json!(false));

    let (status, body) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/availability/{morning}"))
            .insert_header(bearer(&admin))
            .set_json(slot_body(&service, future(3, 8), 60)),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Cannot update a booked slot");

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri("/api/availability/no-such-slot/book")
            .insert_header(bearer(&admin)),
    )
    .await;
    assert_eq!(status, 404);
}

#[actix_web::test]
async fn releasing_a_slot_cancels_its_appointment() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    let admin = admin_token(&app).await;
    let first = customer_token(&app, "ada@example.com").await;
    let second = customer_token(&app, "grace@example.com").await;
    let service = create_service(&app, &admin, "Evening Makeup").await;
    let slot = create_slot(&app, &admin, &service, future(2, 9)).await;
    let booking = json!({ "slotId": slot, "serviceId": service, "location": "Opera house" });

    let (status, booked) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&first))
            .set_json(&booking),
    )
    .await;
    assert_eq!(status, 201);
    let appointment = booked["appointmentId"].as_str().expect("id").to_string();

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/availability/{slot}/release"))
            .insert_header(bearer(&admin)),
    )
    .await;
    assert_eq!(status, 200);

    let (_, free) = call_json(&app, test::TestRequest::get().uri(&format!("/api/availability/{slot}/check"))).await;
    assert_eq!(free, json!(true));

    let (status, held) = call_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/appointments/{appointment}"))
            .insert_header(bearer(&first)),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(held["status"], "CANCELLED");

    let (status, _) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&second))
            .set_json(&booking),
    )
    .await;
    assert_eq!(status, 201);
}

#[actix_web::test]
async fn available_slots_use_an_inclusive_window() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    let admin = admin_token(&app).await;
    let makeup = create_service(&app, &admin, "Evening Makeup").await;
    let lashes = create_service(&app, &admin, "Lash Lift").await;
    let opening = create_slot(&app, &admin, &makeup, future(4, 10)).await;
    let midday = create_slot(&app, &admin, &makeup, future(4, 12)).await;
    let closing = create_slot(&app, &admin, &lashes, future(4, 14)).await;
    create_slot(&app, &admin, &makeup, future(5, 10)).await;

    let window = format!("startTime={}&endTime={}", stamp(future(4, 10)), stamp(future(4, 14)));
    let (status, slots) = call_json(&app, test::TestRequest::get().uri(&format!("/api/availability?{window}"))).await;
    assert_eq!(status, 200);
    assert_eq!(slot_ids(&slots), vec![opening.clone(), midday.clone(), closing]);

    let (status, slots) = call_json(
        &app,
        test::TestRequest::get().uri(&format!("/api/availability?serviceId={makeup}&{window}")),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(slot_ids(&slots), vec![opening.clone(), midday.clone()]);

    let (status, _) = call_json(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/availability/{midday}/book"))
            .insert_header(bearer(&admin)),
    )
    .await;
    assert_eq!(status, 200);
    let (_, slots) = call_json(
        &app,
        test::TestRequest::get().uri(&format!("/api/availability?serviceId={makeup}&{window}")),
    )
    .await;
    assert_eq!(slot_ids(&slots), vec![opening]);

    let (status, body) = call_json(
        &app,
        test::TestRequest::get().uri(&format!("/api/availability?serviceId=missing&{window}")),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["message"], "Service with ID missing not found");
}

#[actix_web::test]
async fn resent_verification_code_replaces_the_old_one() {
    let ctx = context().await;
    let app = init_app!(ctx.state);

    let (status, _) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/signup").set_json(json!({
            "name": "Grace",
            "surname": "Hopper",
            "email": "grace@example.com",
            "phoneNum": "+48111222333",
            "password": "compilers-rule",
        })),
    )
    .await;
    assert_eq!(status, 200);

    let (status, _) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/resend?email=grace@example.com"),
    )
    .await;
    assert_eq!(status, 200);

    let code: String = sqlx::query_scalar("SELECT verification_code FROM users WHERE email = ?")
        .bind("grace@example.com")
        .fetch_one(&ctx.state.db)
        .await
        .expect("code");
    let (status, _) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/verify").set_json(json!({
            "email": "grace@example.com",
            "verificationCode": code,
        })),
    )
    .await;
    assert_eq!(status, 200);
    login(&app, "grace@example.com", "compilers-rule").await;

    let (status, body) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/resend?email=grace@example.com"),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Account is already verified");
}

#[actix_web::test]
async fn password_reset_needs_the_issued_code() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    customer_token(&app, "ada@example.com").await;

    let (status, _) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/pwdresetmail?email=ada@example.com"),
    )
    .await;
    assert_eq!(status, 200);

    let code: String = sqlx::query_scalar("SELECT reset_code FROM users WHERE email = ?")
        .bind("ada@example.com")
        .fetch_one(&ctx.state.db)
        .await
        .expect("reset code");

    let (status, body) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/pwdreset").set_json(json!({
            "email": "ada@example.com",
            "code": format!("{code}-wrong"),
            "newPassword": "difference-engine",
        })),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Invalid reset code");

    let (status, _) = call_json(
        &app,
        test::TestRequest::post().uri("/api/auth/pwdreset").set_json(json!({
            "email": "ada@example.com",
            "code": code,
            "newPassword": "difference-engine",
        })),
    )
    .await;
    assert_eq!(status, 200);
    login(&app, "ada@example.com", "difference-engine").await;

    let (status, _) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "ada@example.com", "password": "analytical-engine" })),
    )
    .await;
    assert_eq!(status, 401);
}

#[actix_web::test]
async fn calendar_account_email_comes_from_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer ya29.granted"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email": "ada.calendar@gmail.com",
            "given_name": "Ada",
            "family_name": "Lovelace",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let ctx = context_with_identity(&server.uri()).await;
    let app = init_app!(ctx.state);
    let customer = customer_token(&app, "ada@example.com").await;

    let (status, connected) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/users/google-calendar/token")
            .insert_header(bearer(&customer))
            .set_json(json!({ "accessToken": "ya29.granted", "accountEmail": "someone.else@gmail.com" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(connected["isConnected"], true);
    assert_eq!(connected["accountEmail"], "ada.calendar@gmail.com");

    let (_, session) = call_json(
        &app,
        test::TestRequest::get().uri("/api/auth/session").insert_header(bearer(&customer)),
    )
    .await;
    let user_id = session["userId"].as_str().expect("user id").to_string();
    let token = salonbook::calendar::find_token(&ctx.state.db, &user_id)
        .await
        .expect("query")
        .expect("stored");
    let now = chrono::Utc::now();
    assert!(!token.expires_before(now + chrono::Duration::minutes(55)));
    assert!(token.expires_before(now + chrono::Duration::minutes(65)));

    // Unreadable userinfo falls back to the address the client sent.
    let (status, connected) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/users/google-calendar/token")
            .insert_header(bearer(&customer))
            .set_json(json!({ "accessToken": "ya29.limited", "expiresIn": 1800, "accountEmail": "ada@gmail.com" })),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(connected["accountEmail"], "ada@gmail.com");
}

#[actix_web::test]
async fn expiring_calendar_tokens_are_refreshed_before_sync() {
    let ctx = context().await;
    let app = init_app!(ctx.state);
    let admin = admin_token(&app).await;
    let customer = customer_token(&app, "ada@example.com").await;
    let service = create_service(&app, &admin, "Evening Makeup").await;
    let slot = create_slot(&app, &admin, &service, future(2, 18)).await;

    let (status, _) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/users/google-calendar/token")
            .insert_header(bearer(&customer))
            .set_json(json!({ "accessToken": "ya29.short", "refreshToken": "r-1", "expiresIn": 60 })),
    )
    .await;
    assert_eq!(status, 200);

    let (status, _) = call_json(
        &app,
        test::TestRequest::post()
            .uri("/api/appointments")
            .insert_header(bearer(&customer))
            .set_json(json!({ "slotId": slot, "serviceId": service, "location": "Opera house" })),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(
        ctx.calendar.calls(),
        vec!["refresh r-1".to_string(), "create Evening Makeup appointment evt-2".to_string()]
    );

    let (_, session) = call_json(
        &app,
        test::TestRequest::get().uri("/api/auth/session").insert_header(bearer(&customer)),
    )
    .await;
    let user_id = session["userId"].as_str().expect("user id").to_string();
    let token = salonbook::calendar::find_token(&ctx.state.db, &user_id)
        .await
        .expect("query")
        .expect("stored");
    assert_eq!(token.access_token, "fresh-r-1");
    assert_eq!(token.refresh_token.as_deref(), Some("r-1"));
}
