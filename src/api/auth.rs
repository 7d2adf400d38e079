use mongodb::bson::doc;
use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use crate::{
    error::{Error, Result},
    model::{
        api::{LoginRequest, PasswordChangeRequest, RegisterRequest, SessionInfo},
        auth::{AuthToken, AUTH_TOKEN_COOKIE},
        db::{Admin, NewUser, User, UserCore, Voter},
        mongodb::{is_duplicate_key_error, Coll, Id},
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![
        login,
        logout,
        register,
        change_password_admin,
        change_password_voter,
    ]
}

#[post("/auth/login", data = "<credentials>", format = "json")]
pub async fn login(
    credentials: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    users: Coll<User>,
    config: &State<Config>,
) -> Result<Json<SessionInfo>> {
    let with_student_id = doc! {
        "student_id": &credentials.student_id,
    };

    // Do not reveal which of the two was wrong.
    let user = users
        .find_one(with_student_id, None)
        .await?
        .filter(|user| user.verify_password(&credentials.password))
        .ok_or_else(|| Error::Unauthorized("Invalid student ID or password".to_string()))?;

    let session = SessionInfo {
        name: user.name.clone(),
        has_voted: user.has_voted,
        is_admin: user.is_admin,
    };

    // Admins and voters get tokens with different rights; an admin token can
    // never cast a ballot.
    let cookie = if user.is_admin {
        AuthToken::new(&Admin(user)).into_cookie(config)
    } else {
        AuthToken::new(&Voter(user)).into_cookie(config)
    };
    cookies.add(cookie);

    Ok(Json(session))
}

#[delete("/auth")]
pub fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}

#[post("/auth/register", data = "<registration>", format = "json")]
pub async fn register(registration: Json<RegisterRequest>, new_users: Coll<NewUser>) -> Result<()> {
    let RegisterRequest {
        student_id,
        name,
        password,
    } = registration.0;

    if student_id.trim().is_empty() || name.trim().is_empty() || password.is_empty() {
        return Err(Error::Validation(
            "Student ID, name, and password must all be provided".to_string(),
        ));
    }

    // The unique index on student IDs makes this insert the only uniqueness
    // check we need, even under concurrent registrations.
    let voter = UserCore::voter(student_id, name, &password)?;
    match new_users.insert_one(&voter, None).await {
        Ok(_) => Ok(()),
        Err(err) if is_duplicate_key_error(&err) => {
            Err(Error::DuplicateStudentId(voter.student_id))
        }
        Err(err) => Err(err.into()),
    }
}

#[put("/auth/password", data = "<change>", format = "json", rank = 1)]
pub async fn change_password_admin(
    token: AuthToken<Admin>,
    change: Json<PasswordChangeRequest>,
    users: Coll<User>,
) -> Result<()> {
    change_password(token.id, change.0, &users).await
}

#[put("/auth/password", data = "<change>", format = "json", rank = 2)]
pub async fn change_password_voter(
    token: AuthToken<Voter>,
    change: Json<PasswordChangeRequest>,
    users: Coll<User>,
) -> Result<()> {
    change_password(token.id, change.0, &users).await
}

/// Replace the signed-in user's password, re-verifying the old one first.
async fn change_password(
    id: Id,
    change: PasswordChangeRequest,
    users: &Coll<User>,
) -> Result<()> {
    let mut user = users
        .find_one(id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::NotFound(format!("No user with ID {id}")))?;

    if !user.verify_password(&change.old_password) {
        return Err(Error::Unauthorized("Incorrect password".to_string()));
    }
    if change.new_password.is_empty() {
        return Err(Error::Validation("New password must not be empty".to_string()));
    }

    user.set_password(&change.new_password)?;
    let update = doc! {
        "$set": { "password_hash": &user.password_hash },
    };
    users.update_one(id.as_doc(), update, None).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use mongodb::Database;
    use rocket::{
        http::ContentType,
        local::asynchronous::{Client, LocalResponse},
        serde::json::serde_json,
    };

    use crate::model::db::DEFAULT_ADMIN_STUDENT_ID;

    use super::*;

    #[backend_test]
    async fn login_issues_voter_session(client: Client, users: Coll<NewUser>) {
        users
            .insert_one(NewUser::voter_example(), None)
            .await
            .unwrap();

        let response = post_login(&client, &LoginRequest::voter_example()).await;
        assert_eq!(Status::Ok, response.status());
        let cookie = response.cookies().get(AUTH_TOKEN_COOKIE);
        assert!(cookie.is_some());

        let session: SessionInfo =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        let expected = SessionInfo {
            name: NewUser::voter_example().name,
            has_voted: false,
            is_admin: false,
        };
        assert_eq!(expected, session);
    }

    #[backend_test]
    async fn login_rejects_bad_credentials(client: Client, users: Coll<NewUser>) {
        users
            .insert_one(NewUser::voter_example(), None)
            .await
            .unwrap();

        // Wrong password.
        let mut credentials = LoginRequest::voter_example();
        credentials.password = "not-the-password".to_string();
        let response = post_login(&client, &credentials).await;
        assert_eq!(Status::Unauthorized, response.status());
        assert!(response.cookies().get(AUTH_TOKEN_COOKIE).is_none());

        // Unknown student ID.
        let credentials = LoginRequest {
            student_id: "1999-99999".to_string(),
            password: "anything".to_string(),
        };
        let response = post_login(&client, &credentials).await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test]
    async fn registration_enables_login(client: Client, db: Database) {
        let registration = RegisterRequest {
            student_id: "2022-09876".to_string(),
            name: "Jose Rizal".to_string(),
            password: "noli-me-tangere".to_string(),
        };
        let response = post_register(&client, &registration).await;
        assert_eq!(Status::Ok, response.status());

        // The stored user is a voter with the password hashed.
        let user = Coll::<User>::from_db(&db)
            .find_one(doc! {"student_id": &registration.student_id}, None)
            .await
            .unwrap()
            .unwrap();
        assert!(!user.is_admin);
        assert!(!user.has_voted);
        assert_ne!(user.password_hash, registration.password);

        let credentials = LoginRequest {
            student_id: registration.student_id,
            password: registration.password,
        };
        let response = post_login(&client, &credentials).await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test]
    async fn registration_rejects_duplicates_and_blanks(client: Client, db: Database) {
        let registration = RegisterRequest {
            student_id: "2022-09876".to_string(),
            name: "Jose Rizal".to_string(),
            password: "noli-me-tangere".to_string(),
        };
        let response = post_register(&client, &registration).await;
        assert_eq!(Status::Ok, response.status());

        // Same student ID again.
        let response = post_register(&client, &registration).await;
        assert_eq!(Status::Conflict, response.status());

        // Blank fields.
        for bad in [
            RegisterRequest {
                student_id: "  ".to_string(),
                name: "No ID".to_string(),
                password: "pw".to_string(),
            },
            RegisterRequest {
                student_id: "2022-11111".to_string(),
                name: "".to_string(),
                password: "pw".to_string(),
            },
            RegisterRequest {
                student_id: "2022-11111".to_string(),
                name: "No Password".to_string(),
                password: "".to_string(),
            },
        ] {
            let response = post_register(&client, &bad).await;
            assert_eq!(Status::BadRequest, response.status());
        }

        // Only the successful registration (plus the bootstrap admin) exists.
        let count = Coll::<User>::from_db(&db)
            .count_documents(doc! {"is_admin": false}, None)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[backend_test]
    async fn bootstrap_admin_is_provisioned(client: Client, db: Database) {
        let admin = Coll::<User>::from_db(&db)
            .find_one(doc! {"is_admin": true}, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.student_id, DEFAULT_ADMIN_STUDENT_ID);
        // The generated credential is stored hashed, never fixed.
        assert!(admin.password_hash.starts_with("$argon2"));

        // Keep the borrow checker happy about the unused client.
        let _ = client;
    }

    #[backend_test(admin)]
    async fn password_change_requires_old_password(client: Client, db: Database) {
        // Wrong old password.
        let change = PasswordChangeRequest {
            old_password: "not-it".to_string(),
            new_password: "recount-the-votes".to_string(),
        };
        let response = put_password(&client, &change).await;
        assert_eq!(Status::Unauthorized, response.status());

        // Correct old password.
        let change = PasswordChangeRequest {
            old_password: LoginRequest::admin_example().password,
            new_password: "recount-the-votes".to_string(),
        };
        let response = put_password(&client, &change).await;
        assert_eq!(Status::Ok, response.status());

        // The old credential no longer verifies; the new one does.
        let user = Coll::<User>::from_db(&db)
            .find_one(
                doc! {"student_id": &LoginRequest::admin_example().student_id},
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!user.verify_password(LoginRequest::admin_example().password));
        assert!(user.verify_password("recount-the-votes"));
    }

    #[backend_test]
    async fn password_change_requires_authentication(client: Client) {
        let change = PasswordChangeRequest {
            old_password: "old".to_string(),
            new_password: "new".to_string(),
        };
        let response = put_password(&client, &change).await;
        assert_eq!(Status::NotFound, response.status());
    }

    async fn post_login<'c>(client: &'c Client, credentials: &LoginRequest) -> LocalResponse<'c> {
        client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(serde_json::to_string(credentials).unwrap())
            .dispatch()
            .await
    }

    async fn post_register<'c>(
        client: &'c Client,
        registration: &RegisterRequest,
    ) -> LocalResponse<'c> {
        client
            .post(uri!(register))
            .header(ContentType::JSON)
            .body(serde_json::to_string(registration).unwrap())
            .dispatch()
            .await
    }

    async fn put_password<'c>(
        client: &'c Client,
        change: &PasswordChangeRequest,
    ) -> LocalResponse<'c> {
        client
            .put(uri!(change_password_admin))
            .header(ContentType::JSON)
            .body(serde_json::to_string(change).unwrap())
            .dispatch()
            .await
    }
}
