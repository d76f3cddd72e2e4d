use actix_identity::Identity;
use actix_web::{
    get,
    http::StatusCode,
    post,
    web::{self, Data},
    HttpRequest, HttpResponse, Responder,
};
use tera::Context;

use crate::{
    auth::{self, AnyRole, Authorized},
    db::{self, Viewer},
    errors::AppError,
    models::Role,
    routes::auth::{change_password, register_resident, ChangePassword, Login, Register},
    AppState, TEMPLATES,
};

fn render(template: &str, context: &Context, status: StatusCode) -> Result<HttpResponse, AppError> {
    let rendered = TEMPLATES.render(template, context).map_err(|e| {
        log::error!("Failed to render template: {}", e);
        AppError::TemplateError(e)
    })?;

    Ok(HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(rendered))
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header(("Location", location))
        .finish()
}

fn page(title: &str) -> Context {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("version", env!("CARGO_PKG_VERSION"));
    context
}

#[get("/")]
pub async fn index_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
) -> Result<impl Responder, AppError> {
    let locations = db::tps::list_locations(&state).await?;

    let id = match identity.map(|id| id.id()) {
        None => "anonymous".to_owned(),
        Some(Ok(id)) => id,
        Some(Err(err)) => return Err(AppError::IdentityError(err.to_string())),
    };

    let mut context = page("GoClean");
    context.insert("locations", &locations);
    context.insert("identity", &id);
    render("home.html", &context, StatusCode::OK)
}

#[get("/login")]
pub async fn login_handler() -> Result<impl Responder, AppError> {
    render("login.html", &page("Login"), StatusCode::OK)
}

#[post("/login")]
pub async fn login_form_handler(
    web::Form(form): web::Form<Login>,
    state: Data<AppState>,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    match db::users::authenticate(&state, &form.email, &form.password).await {
        Ok(user) => {
            auth::start_session(&request, &user)?;
            Ok(redirect("/dashboard"))
        }
        Err(AppError::Unauthorized(message)) => {
            let mut context = page("Login");
            context.insert("error", &message);
            context.insert("email", form.email.trim());
            render("login.html", &context, StatusCode::UNAUTHORIZED)
        }
        Err(e) => Err(e),
    }
}

#[get("/register")]
pub async fn register_handler() -> Result<impl Responder, AppError> {
    render("register.html", &page("Register"), StatusCode::OK)
}

#[post("/register")]
pub async fn register_form_handler(
    web::Form(form): web::Form<Register>,
    state: Data<AppState>,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    let name = form.name.clone();
    let email = form.email.clone();
    match register_resident(&state, form).await {
        Ok(user) => {
            auth::start_session(&request, &user)?;
            Ok(redirect("/dashboard"))
        }
        Err(AppError::Validation(message)) => {
            let mut context = page("Register");
            context.insert("error", &message);
            context.insert("name", name.trim());
            context.insert("email", email.trim());
            render("register.html", &context, StatusCode::BAD_REQUEST)
        }
        Err(e) => Err(e),
    }
}

#[post("/logout")]
pub async fn logout_handler(identity: Option<Identity>) -> impl Responder {
    if let Some(identity) = identity {
        identity.logout();
    }
    redirect("/")
}

#[get("/dashboard")]
pub async fn dashboard_handler(
    auth: Option<Authorized<AnyRole>>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let Some(auth) = auth else {
        return Ok(redirect("/login"));
    };

    let user = db::users::get_user_by_id(&state, auth.user_id).await?;
    let viewer = Viewer::new(user.id, user.role);
    let pickups = db::pickups::list_pickups(&state, viewer, None).await?;
    let transactions = db::transactions::list_transactions(&state, viewer).await?;
    let unread = db::notifications::unread_count(&state, user.id).await?;
    let open_pickups = pickups.iter().filter(|p| !p.status.is_terminal()).count();

    let mut context = page("Dashboard");
    context.insert("user", &user);
    context.insert("is_resident", &(user.role == Role::User));
    context.insert("is_tps", &(user.role == Role::Tps));
    context.insert("is_admin", &(user.role == Role::Admin));
    context.insert("pickups", &pickups);
    context.insert("open_pickups", &open_pickups);
    context.insert("transactions", &transactions);
    context.insert("unread", &unread);
    render("dashboard.html", &context, StatusCode::OK)
}

#[get("/change-pwd")]
pub async fn change_pwd_handler(
    auth: Option<Authorized<AnyRole>>,
) -> Result<impl Responder, AppError> {
    if auth.is_none() {
        return Ok(redirect("/login"));
    }
    render("change-pwd.html", &page("Change Password"), StatusCode::OK)
}

#[post("/change-pwd")]
pub async fn change_pwd_form_handler(
    web::Form(form): web::Form<ChangePassword>,
    state: Data<AppState>,
    auth: Option<Authorized<AnyRole>>,
) -> Result<impl Responder, AppError> {
    let Some(auth) = auth else {
        return Ok(redirect("/login"));
    };

    match change_password(&state, auth.user_id, form).await {
        Ok(()) => Ok(redirect("/dashboard")),
        Err(AppError::Validation(message)) | Err(AppError::Unauthorized(message)) => {
            let mut context = page("Change Password");
            context.insert("error", &message);
            render("change-pwd.html", &context, StatusCode::BAD_REQUEST)
        }
        Err(e) => Err(e),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index_handler)
        .service(login_handler)
        .service(login_form_handler)
        .service(register_handler)
        .service(register_form_handler)
        .service(logout_handler)
        .service(dashboard_handler)
        .service(change_pwd_handler)
        .service(change_pwd_form_handler);
}
